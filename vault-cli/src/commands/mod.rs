mod backup;
mod recovery;
mod schedule;
mod serve;
mod sweep;
mod verify;

// Backup commands
pub use backup::{
    run_backup_full, run_backup_history, run_backup_incremental, run_backup_list,
};

// Recovery commands
pub use recovery::{run_recovery_approve, run_recovery_execute, run_recovery_initiate};

// Schedule commands
pub use schedule::{
    run_schedule_create, run_schedule_due, run_schedule_list, run_schedule_set_active,
};

// Retention / verification commands
pub use sweep::run_sweep;
pub use verify::run_verify;

// Scheduler driver
pub use serve::run_serve;
