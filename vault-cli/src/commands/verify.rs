use crate::app::CliApp;
use tracing::{info, warn};
use vault_core::error::Result;
use vault_core::store::VerificationStatus;

/// 校验备份产物的完整性
pub async fn run_verify(app: &CliApp, execution_id: &str) -> Result<()> {
    info!("🔍 校验备份完整性: {}", execution_id);
    info!("=================");

    let report = app.verifier.verify_integrity(execution_id).await?;

    match report.status {
        VerificationStatus::Verified => info!("✅ 校验通过"),
        _ => {
            warn!("❌ 校验失败");
            if !report.checksum_match {
                warn!("   校验和不匹配，产物可能已损坏或被篡改");
            }
            if !report.structure_ok {
                warn!("   归档结构不完整，无法完整遍历");
            }
        }
    }
    Ok(())
}
