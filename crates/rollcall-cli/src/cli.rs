use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "rollcall")]
#[command(about = "Operate the member roll and its document replica")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Override ROLLCALL_RELATIONAL_DB_PATH
    #[arg(long, global = true, value_name = "PATH")]
    pub relational_db: Option<PathBuf>,

    /// Override ROLLCALL_REPLICA_DB_PATH
    #[arg(long, global = true, value_name = "PATH")]
    pub replica_db: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Administer relational member records
    Member {
        #[command(subcommand)]
        command: MemberCommands,
    },
    /// Member self-service profile update on the replica
    Profile {
        /// Entity key (DDMMYY-XXXX or ten digits)
        entity_key: String,
        /// Document path assignments, e.g. profile.phone=0701234567
        #[arg(required = true, value_name = "PATH=VALUE")]
        assignments: Vec<String>,
    },
    /// Run one reconciliation pass
    Reconcile {
        /// Output the run as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the reconciler on a fixed interval
    Schedule {
        /// Seconds between runs (defaults to ROLLCALL_SYNC_INTERVAL_SECS)
        #[arg(long, value_name = "SECS")]
        interval_secs: Option<u64>,
        /// Stop after this many runs
        #[arg(long, value_name = "N")]
        max_runs: Option<usize>,
    },
    /// Inspect or clean up a pending-change queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Show recent reconciler runs
    Runs {
        /// Number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show replica audit log entries
    Audit {
        /// Only entries for this entity key
        entity_key: Option<String>,
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum MemberCommands {
    /// Create a member
    Add {
        entity_key: String,
        #[command(flatten)]
        fields: MemberFields,
    },
    /// Set column values, e.g. phone=0701234567 gender=2
    Edit {
        entity_key: String,
        #[arg(required = true, value_name = "COLUMN=VALUE")]
        assignments: Vec<String>,
    },
    /// Replace the postal address
    Address {
        entity_key: String,
        #[arg(long)]
        street: Option<String>,
        #[arg(long)]
        postal_code: Option<String>,
        #[arg(long)]
        city: Option<String>,
        #[arg(long)]
        country: Option<String>,
    },
    /// Soft-delete a member
    Delete { entity_key: String },
    /// Show one member
    Show {
        entity_key: String,
        #[arg(long)]
        json: bool,
    },
    /// List members
    List {
        #[arg(short, long, default_value = "50")]
        limit: usize,
        /// Include soft-deleted members
        #[arg(long)]
        include_deleted: bool,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug, Default)]
pub struct MemberFields {
    #[arg(long)]
    pub name: String,
    /// YYYY-MM-DD
    #[arg(long)]
    pub birthday: Option<String>,
    /// 1 male, 2 female, 3 other
    #[arg(long, default_value = "0")]
    pub gender: i64,
    /// 1 owner, 2 rental, 3 cooperative, 4 family, 5 other, 6 homeless
    #[arg(long, default_value = "0")]
    pub housing: i64,
    #[arg(long)]
    pub email: Option<String>,
    #[arg(long)]
    pub phone: Option<String>,
    #[arg(long)]
    pub facebook: Option<String>,
    #[arg(long)]
    pub street: Option<String>,
    #[arg(long)]
    pub postal_code: Option<String>,
    #[arg(long)]
    pub city: Option<String>,
    #[arg(long)]
    pub country: Option<String>,
    #[arg(long)]
    pub reachable: bool,
    #[arg(long)]
    pub groupable: bool,
    /// YYYY-MM-DD
    #[arg(long)]
    pub date_joined: Option<String>,
    #[arg(long)]
    pub admin_notes: Option<String>,
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// Counts per status
    Status {
        #[arg(long, value_enum, default_value_t = QueueSide::Replica)]
        side: QueueSide,
        #[arg(long)]
        json: bool,
    },
    /// Most recent entries
    List {
        #[arg(long, value_enum, default_value_t = QueueSide::Replica)]
        side: QueueSide,
        #[arg(long, value_enum)]
        status: Option<QueueStatusFilter>,
        #[arg(short, long, default_value = "20")]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Delete synced entries older than the given age
    Cleanup {
        #[arg(long, value_enum, default_value_t = QueueSide::Replica)]
        side: QueueSide,
        #[arg(long, default_value = "30")]
        older_than_days: u32,
    },
}

/// Which store's queue to operate on
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum QueueSide {
    Relational,
    Replica,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum QueueStatusFilter {
    Pending,
    Synced,
    Failed,
}
