pub mod bounded;
pub mod config_models;
pub mod config_store;
pub mod error;
pub mod events;
pub mod host_keys;
pub mod local_stats;
pub mod metric_history;
pub mod monitor;
pub mod profile_models;
pub mod profile_store;
pub mod pty_engine;
pub mod rdp_engine;
pub mod resources;
pub mod sftp_channel;
pub mod shell_probe;
pub mod ssh_engine;
pub mod tab_supervisor;

pub use bounded::{BoundedMap, BoundedVec};
pub use config_models::AppConfig;
pub use config_store::ConfigStore;
pub use error::{CoreError, CoreResult, ErrorKind};
pub use events::{Event, EventBus, ProfileChangeKind};
pub use host_keys::HostKeyStore;
pub use local_stats::LocalStatsProvider;
pub use metric_history::{MetricHistory, MetricKind, MetricSample};
pub use monitor::MonitorManager;
pub use profile_models::{Profile, ProfileFolder, ProfileType, RdpConfig, SshConfig};
pub use profile_store::ProfileStore;
pub use pty_engine::PtyEngine;
pub use rdp_engine::RdpEngine;
pub use resources::{Closeable, ResourceManager};
pub use sftp_channel::{SftpEntry, SftpFileContent, SftpManager};
pub use shell_probe::{OsInfo, ShellInfo, ShellProbe};
pub use ssh_engine::SshEngine;
pub use tab_supervisor::{ActiveTabInfo, ConnectionKind, SessionStatus, Tab, TabSupervisor};
