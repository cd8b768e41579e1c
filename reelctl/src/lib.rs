use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use clap::{Args, Parser, Subcommand, ValueEnum};
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use thiserror::Error;

use reel_core::catalog::{plan_renditions, DEFAULT_CATALOG};
use reel_core::manifest::{render_master, MasterVariant};
use reel_core::status::{AssetFilter, AssetRecord, ProcessingState, SqliteStatusStore};
use reel_core::{load_pipeline_config, load_reel_config, ConfigBundle};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] reel_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("status store error: {0}")]
    Status(#[from] reel_core::StatusError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("required resource missing: {0}")]
    MissingResource(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "reel ingest pipeline control interface", long_about = None)]
pub struct Cli {
    /// Path to the main reel.toml
    #[arg(long, default_value = "configs/reel.toml")]
    pub config: PathBuf,
    /// Alternate path for pipeline.toml
    #[arg(long)]
    pub pipeline_config: Option<PathBuf>,
    /// Data directory override (replaces paths.data_dir)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Alternate path for assets.sqlite
    #[arg(long)]
    pub assets_db: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Summarized pipeline status
    Status,
    /// Asset inspection and repair
    #[command(subcommand)]
    Assets(AssetCommands),
    /// Preview the rendition ladder for a source height
    Plan(PlanArgs),
    /// Preview the master manifest for a tier set
    Manifest(ManifestArgs),
    /// Run integrity checks
    #[command(name = "health")]
    #[command(subcommand)]
    Health(HealthCommands),
}

#[derive(Subcommand, Debug)]
pub enum AssetCommands {
    /// List assets recorded in the status store
    List(AssetListArgs),
    /// Assets stuck in processing
    Stalled(StalledArgs),
    /// Mark an asset failed after manual investigation
    MarkFailed(MarkFailedArgs),
}

#[derive(Args, Debug)]
pub struct AssetListArgs {
    /// Filter by processing status
    #[arg(long)]
    pub status: Option<String>,
    /// Maximum number of rows
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct StalledArgs {
    /// Minimum age in minutes since the last update
    #[arg(long, default_value_t = 60)]
    pub older_than_mins: i64,
}

#[derive(Args, Debug)]
pub struct MarkFailedArgs {
    pub asset_id: String,
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Detected source height in pixels
    #[arg(long)]
    pub height: u32,
}

#[derive(Args, Debug)]
pub struct ManifestArgs {
    /// Tier names, e.g. 240p 720p; defaults to the full catalog
    pub tiers: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum HealthCommands {
    /// Run basic checks
    Check,
}

pub fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Status => {
            let status = context.gather_status()?;
            render(&status, cli.format)?;
        }
        Commands::Assets(AssetCommands::List(args)) => {
            let assets = context.asset_list(args)?;
            render(&assets, cli.format)?;
        }
        Commands::Assets(AssetCommands::Stalled(args)) => {
            let assets = context.asset_stalled(args)?;
            render(&assets, cli.format)?;
        }
        Commands::Assets(AssetCommands::MarkFailed(args)) => {
            let result = context.mark_failed(args)?;
            render(&result, cli.format)?;
        }
        Commands::Plan(args) => {
            let plan = context.plan_preview(args);
            render(&plan, cli.format)?;
        }
        Commands::Manifest(args) => {
            let manifest = context.manifest_preview(args)?;
            render(&manifest, cli.format)?;
        }
        Commands::Health(HealthCommands::Check) => {
            let report = context.health_check();
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "one or more checks failed".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    bundle: ConfigBundle,
    config_path: PathBuf,
    pipeline_path: PathBuf,
    assets_db: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.clone();
        let reel = load_reel_config(&config_path)?;

        let config_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let pipeline_path = cli
            .pipeline_config
            .clone()
            .unwrap_or_else(|| config_dir.join("pipeline.toml"));
        let pipeline = load_pipeline_config(&pipeline_path)?;
        let bundle = ConfigBundle {
            reel: reel.clone(),
            pipeline,
        };

        let data_dir = cli
            .data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(&reel.paths.data_dir));
        let assets_db = cli
            .assets_db
            .clone()
            .unwrap_or_else(|| data_dir.join("assets.sqlite"));

        Ok(Self {
            bundle,
            config_path,
            pipeline_path,
            assets_db,
        })
    }

    fn read_store(&self) -> Result<SqliteStatusStore> {
        Ok(SqliteStatusStore::builder(&self.assets_db)
            .read_only(true)
            .build()?)
    }

    fn write_store(&self) -> Result<SqliteStatusStore> {
        Ok(SqliteStatusStore::builder(&self.assets_db)
            .create_if_missing(false)
            .build()?)
    }

    fn gather_status(&self) -> Result<StatusReport> {
        let node = NodeStatus {
            node_name: self.bundle.reel.system.node_name.clone(),
            environment: self.bundle.reel.system.environment.clone(),
        };
        let asset_counts = self
            .read_store()
            .and_then(|store| Ok(store.count_by_status()?))
            .map(|counts| {
                counts
                    .into_iter()
                    .map(|(state, count)| (state.as_str().to_string(), count))
                    .collect::<HashMap<_, _>>()
            })
            .unwrap_or_default();

        Ok(StatusReport {
            node,
            asset_counts,
            max_concurrent_jobs: self.bundle.reel.limits.max_concurrent_jobs,
        })
    }

    fn asset_list(&self, args: &AssetListArgs) -> Result<AssetList> {
        let status = args
            .status
            .as_deref()
            .map(|raw| {
                raw.parse::<ProcessingState>()
                    .map_err(|_| AppError::InvalidArgument(format!("unknown status: {raw}")))
            })
            .transpose()?;
        let store = self.read_store()?;
        let rows = store.list(&AssetFilter {
            status,
            limit: Some(args.limit),
        })?;
        Ok(AssetList { rows })
    }

    fn asset_stalled(&self, args: &StalledArgs) -> Result<AssetList> {
        let store = self.read_store()?;
        let rows = store.stalled(chrono::Duration::minutes(args.older_than_mins))?;
        Ok(AssetList { rows })
    }

    fn mark_failed(&self, args: &MarkFailedArgs) -> Result<MarkFailedResult> {
        let store = self.write_store()?;
        store.set_state(&args.asset_id, ProcessingState::Failed)?;
        Ok(MarkFailedResult {
            asset_id: args.asset_id.clone(),
            status: ProcessingState::Failed,
        })
    }

    fn plan_preview(&self, args: &PlanArgs) -> PlanPreview {
        let planned = plan_renditions(args.height, &DEFAULT_CATALOG);
        PlanPreview {
            source_height: args.height,
            tiers: planned
                .iter()
                .map(|tier| TierSummary {
                    name: tier.name.to_string(),
                    height: tier.height,
                    bitrate: tier.bitrate,
                })
                .collect(),
        }
    }

    fn manifest_preview(&self, args: &ManifestArgs) -> Result<ManifestPreview> {
        let variants = if args.tiers.is_empty() {
            DEFAULT_CATALOG
                .iter()
                .map(|tier| MasterVariant::for_tier(*tier))
                .collect::<Vec<_>>()
        } else {
            for name in &args.tiers {
                if !DEFAULT_CATALOG.iter().any(|tier| tier.name == *name) {
                    let known: Vec<&str> = DEFAULT_CATALOG.iter().map(|t| t.name).collect();
                    return Err(AppError::InvalidArgument(format!(
                        "unknown tier {name:?}; known tiers: {}",
                        known.join(", ")
                    )));
                }
            }
            // Preserve catalog order whatever order names were given in.
            // Repeated names collapse to a single entry.
            DEFAULT_CATALOG
                .iter()
                .filter(|tier| args.tiers.iter().any(|name| name == tier.name))
                .map(|tier| MasterVariant::for_tier(*tier))
                .collect()
        };
        Ok(ManifestPreview {
            content: render_master(&variants),
        })
    }

    fn health_check(&self) -> Vec<HealthEntry> {
        let mut results = Vec::new();
        results.push(self.check_path("reel.toml", &self.config_path));
        results.push(self.check_path("pipeline.toml", &self.pipeline_path));
        results.push(self.check_database("assets.sqlite", &self.assets_db));
        results.push(self.check_tool(
            "ffmpeg",
            &self.bundle.pipeline.transcode.ffmpeg_path,
        ));
        results.push(self.check_tool(
            "ffprobe",
            &self.bundle.pipeline.transcode.ffprobe_path,
        ));
        results.push(self.check_directory(
            "scratch_dir",
            Path::new(&self.bundle.reel.paths.scratch_dir),
        ));
        results.push(self.check_directory(
            "storage root",
            Path::new(&self.bundle.reel.storage.root_dir),
        ));
        results
    }

    fn check_path(&self, name: &str, path: &Path) -> HealthEntry {
        if path.exists() {
            HealthEntry::ok(name, format!("{}", path.display()))
        } else {
            HealthEntry::error(name, format!("{} missing", path.display()))
        }
    }

    fn check_directory(&self, name: &str, path: &Path) -> HealthEntry {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_dir() => HealthEntry::ok(name, format!("{}", path.display())),
            Ok(_) => HealthEntry::warn(name, format!("{} is not a directory", path.display())),
            Err(_) => HealthEntry::warn(name, format!("{} not found", path.display())),
        }
    }

    fn check_database(&self, name: &str, path: &Path) -> HealthEntry {
        if !path.exists() {
            return HealthEntry::warn(name, format!("{} not found", path.display()));
        }
        match Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY) {
            Ok(conn) => {
                let pragma: rusqlite::Result<String> =
                    conn.query_row("PRAGMA integrity_check;", [], |row| row.get(0));
                match pragma {
                    Ok(result) if result.to_lowercase() == "ok" => {
                        HealthEntry::ok(name, "integrity ok".to_string())
                    }
                    Ok(result) => HealthEntry::warn(name, format!("integrity_check: {result}")),
                    Err(err) => HealthEntry::warn(name, format!("error: {err}")),
                }
            }
            Err(err) => HealthEntry::error(name, format!("failed to open: {err}")),
        }
    }

    fn check_tool(&self, name: &str, program: &Path) -> HealthEntry {
        let result = Command::new(program)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match result {
            Ok(status) if status.success() => {
                HealthEntry::ok(name, format!("{}", program.display()))
            }
            Ok(status) => HealthEntry::warn(
                name,
                format!("{} exited with {status}", program.display()),
            ),
            Err(err) => HealthEntry::error(name, format!("{}: {err}", program.display())),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub node: NodeStatus,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub asset_counts: HashMap<String, i64>,
    pub max_concurrent_jobs: usize,
}

impl DisplayFallback for StatusReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "Node: {} (env: {})",
            self.node.node_name, self.node.environment
        )];
        lines.push(format!("Worker slots: {}", self.max_concurrent_jobs));
        if self.asset_counts.is_empty() {
            lines.push("Assets: status store unavailable".to_string());
        } else {
            lines.push("Assets:".to_string());
            for state in ["uploading", "processing", "done", "failed"] {
                if let Some(count) = self.asset_counts.get(state) {
                    lines.push(format!("  - {state}: {count}"));
                }
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct NodeStatus {
    pub node_name: String,
    pub environment: String,
}

#[derive(Debug, Serialize)]
pub struct AssetList {
    pub rows: Vec<AssetRecord>,
}

impl DisplayFallback for AssetList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No assets found".to_string();
        }
        let mut lines = Vec::new();
        for entry in &self.rows {
            let updated = entry
                .updated_at
                .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string());
            lines.push(format!(
                "{} | owner={} | {} | status={} | updated={}",
                entry.asset_id,
                entry.owner_id,
                entry.title.as_deref().unwrap_or("<untitled>"),
                entry.processing_status,
                updated
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct MarkFailedResult {
    pub asset_id: String,
    pub status: ProcessingState,
}

impl DisplayFallback for MarkFailedResult {
    fn display(&self) -> String {
        format!("{} marked {}", self.asset_id, self.status)
    }
}

#[derive(Debug, Serialize)]
pub struct PlanPreview {
    pub source_height: u32,
    pub tiers: Vec<TierSummary>,
}

#[derive(Debug, Serialize)]
pub struct TierSummary {
    pub name: String,
    pub height: u32,
    pub bitrate: u32,
}

impl DisplayFallback for PlanPreview {
    fn display(&self) -> String {
        if self.tiers.is_empty() {
            return format!(
                "Source height {}p is below every tier; nothing planned",
                self.source_height
            );
        }
        let mut lines = vec![format!("Ladder for {}p source:", self.source_height)];
        for tier in &self.tiers {
            lines.push(format!(
                "  - {} ({}p @ {} bit/s)",
                tier.name, tier.height, tier.bitrate
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct ManifestPreview {
    pub content: String,
}

impl DisplayFallback for ManifestPreview {
    fn display(&self) -> String {
        self.content.clone()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        let mut lines = Vec::new();
        for entry in self {
            lines.push(format!(
                "[{status}] {name}: {detail}",
                status = entry.status,
                name = entry.name,
                detail = entry.detail
            ));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn prepare_test_context() -> (TempDir, AppContext) {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let configs_dir = root.join("configs");
        fs::create_dir_all(&configs_dir).unwrap();
        fs::copy("../configs/reel.toml", configs_dir.join("reel.toml")).unwrap();
        fs::copy("../configs/pipeline.toml", configs_dir.join("pipeline.toml")).unwrap();

        let data_dir = root.join("data");
        fs::create_dir_all(&data_dir).unwrap();
        let assets_db = data_dir.join("assets.sqlite");
        let store = SqliteStatusStore::builder(&assets_db).build().unwrap();
        store.register_upload("a1", "u1", Some("First")).unwrap();
        store.register_upload("a2", "u1", None).unwrap();
        store.set_state("a2", ProcessingState::Done).unwrap();

        let cli = Cli {
            config: configs_dir.join("reel.toml"),
            pipeline_config: None,
            data_dir: Some(data_dir.clone()),
            assets_db: Some(assets_db),
            format: OutputFormat::Json,
            command: Commands::Status,
        };
        let context = AppContext::new(&cli).unwrap();
        (temp, context)
    }

    #[test]
    fn status_report_counts_assets() {
        let (_temp, context) = prepare_test_context();
        let status = context.gather_status().unwrap();
        assert_eq!(status.node.node_name, "reel-dev");
        assert_eq!(status.asset_counts.get("uploading"), Some(&1));
        assert_eq!(status.asset_counts.get("done"), Some(&1));
    }

    #[test]
    fn asset_listing_filters_by_status() {
        let (_temp, context) = prepare_test_context();
        let all = context
            .asset_list(&AssetListArgs {
                status: None,
                limit: 10,
            })
            .unwrap();
        assert_eq!(all.rows.len(), 2);

        let done = context
            .asset_list(&AssetListArgs {
                status: Some("done".to_string()),
                limit: 10,
            })
            .unwrap();
        assert_eq!(done.rows.len(), 1);
        assert_eq!(done.rows[0].asset_id, "a2");

        let err = context.asset_list(&AssetListArgs {
            status: Some("bogus".to_string()),
            limit: 10,
        });
        assert!(matches!(err, Err(AppError::InvalidArgument(_))));
    }

    #[test]
    fn mark_failed_updates_the_row() {
        let (_temp, context) = prepare_test_context();
        let result = context
            .mark_failed(&MarkFailedArgs {
                asset_id: "a1".to_string(),
            })
            .unwrap();
        assert_eq!(result.status, ProcessingState::Failed);

        let list = context
            .asset_list(&AssetListArgs {
                status: Some("failed".to_string()),
                limit: 10,
            })
            .unwrap();
        assert_eq!(list.rows.len(), 1);
        assert_eq!(list.rows[0].asset_id, "a1");
    }

    #[test]
    fn plan_preview_never_upscales() {
        let (_temp, context) = prepare_test_context();
        let plan = context.plan_preview(&PlanArgs { height: 480 });
        let names: Vec<&str> = plan.tiers.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["240p", "480p"]);
    }

    #[test]
    fn manifest_preview_orders_by_catalog_and_rejects_unknown_names() {
        let (_temp, context) = prepare_test_context();
        let preview = context
            .manifest_preview(&ManifestArgs {
                tiers: vec!["720p".to_string(), "240p".to_string()],
            })
            .unwrap();
        let first = preview.content.find("240p/index.m3u8").unwrap();
        let second = preview.content.find("720p/index.m3u8").unwrap();
        assert!(first < second);

        let err = context.manifest_preview(&ManifestArgs {
            tiers: vec!["999p".to_string()],
        });
        match err {
            Err(AppError::InvalidArgument(message)) => {
                assert!(message.contains("999p"), "message: {message}");
            }
            other => panic!("expected invalid argument, got {other:?}"),
        }
    }

    #[test]
    fn manifest_preview_collapses_repeated_tier_names() {
        let (_temp, context) = prepare_test_context();
        let preview = context
            .manifest_preview(&ManifestArgs {
                tiers: vec!["240p".to_string(), "240p".to_string()],
            })
            .unwrap();
        assert_eq!(preview.content.matches("#EXT-X-STREAM-INF").count(), 1);
        assert!(preview.content.contains("240p/index.m3u8"));
    }
}
