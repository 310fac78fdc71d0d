use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use dualwrite::{DualWriter, DualWriterConfig, DualWriterRegistry};
use dualwrite_core::prelude::*;
use dualwrite_kubehub::KubeUnifiedStore;
use dualwrite_persist::SqliteLegacyStore;
use dualwrite_store::MemoryStore;
use metrics::counter;
use serde::Deserialize;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "dualctl", version, about = "Drive a legacy and a unified store through one DualWriter")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Resource type, e.g. "dashboard.example.io/v1/Dashboard"
    #[arg(long = "kind", global = true, env = "DUALWRITE_KIND", default_value = "dashboard.example.io/v1/Dashboard")]
    kind: String,

    /// Plural resource name (memory backend only; default: lowercase kind + "s")
    #[arg(long = "plural", global = true)]
    plural: Option<String>,

    /// Treat the kind as cluster-scoped (memory backend only)
    #[arg(long = "cluster-scoped", global = true, action = ArgAction::SetTrue)]
    cluster_scoped: bool,

    /// Namespace for namespaced kinds
    #[arg(long = "ns", global = true, env = "DUALWRITE_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Force a mode for this run (otherwise DUALWRITE_MODE / DUALWRITE_MODES)
    #[arg(long = "mode", global = true)]
    mode: Option<Mode>,

    /// Legacy SQLite database (default: DUALWRITE_DB_PATH or ~/.dualwrite/legacy.db)
    #[arg(long = "db", global = true)]
    db: Option<String>,

    /// Wire the legacy store with reads only
    #[arg(long = "legacy-read-only", global = true, action = ArgAction::SetTrue)]
    legacy_read_only: bool,

    /// Unified backend; `memory` starts empty on every run
    #[arg(long = "unified", global = true, value_enum, env = "DUALWRITE_UNIFIED", default_value_t = Backend::Memory)]
    unified: Backend,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json, Yaml }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Backend { Memory, Kube }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the resolved mode and the legacy capabilities
    Mode,
    /// Create objects from a YAML file (multi-document allowed)
    Create {
        #[arg(short = 'f', long = "file")]
        file: String,
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// Get one object
    Get { name: String },
    /// List objects
    List {
        /// Label selector, e.g. "team=infra,tier!=web"
        #[arg(short = 'l', long = "selector")]
        selector: Option<String>,
        #[arg(long = "limit")]
        limit: Option<usize>,
        #[arg(long = "continue")]
        continue_token: Option<String>,
    },
    /// Replace an object with the one in a YAML file
    Update {
        #[arg(short = 'f', long = "file")]
        file: String,
        /// Create the object if it does not exist
        #[arg(long = "force-create", action = ArgAction::SetTrue)]
        force_create: bool,
        /// Require this resourceVersion
        #[arg(long = "rv")]
        resource_version: Option<String>,
        /// Require this uid
        #[arg(long = "uid")]
        uid: Option<String>,
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// Delete one object
    Delete {
        name: String,
        #[arg(long = "rv")]
        resource_version: Option<String>,
        #[arg(long = "uid")]
        uid: Option<String>,
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// Delete every object matching a selector
    DeleteCollection {
        #[arg(short = 'l', long = "selector")]
        selector: Option<String>,
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// Compare both stores and report objects that differ
    Drift {
        #[arg(short = 'l', long = "selector")]
        selector: Option<String>,
        /// Only print entries that are not in sync
        #[arg(long = "only-drifted", action = ArgAction::SetTrue)]
        only_drifted: bool,
    },
    /// Render the list as a table
    Table {
        #[arg(short = 'l', long = "selector")]
        selector: Option<String>,
        #[arg(long = "no-headers", action = ArgAction::SetTrue)]
        no_headers: bool,
    },
}

fn init_tracing() {
    let env = std::env::var("DUALWRITE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("DUALWRITE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid DUALWRITE_METRICS_ADDR; expected host:port");
        }
    }
}

/// `group/version/Kind` or `version/Kind` into a kind for the memory backend.
fn parse_kind(key: &str, plural: Option<&str>, namespaced: bool) -> Result<ResourceKind> {
    let parts: Vec<&str> = key.split('/').collect();
    let (group, version, kind) = match parts.as_slice() {
        [version, kind] => ("", *version, *kind),
        [group, version, kind] => (*group, *version, *kind),
        _ => return Err(anyhow!("invalid kind {} (expect v1/Kind or group/v1/Kind)", key)),
    };
    let plural = plural.map(str::to_string).unwrap_or_else(|| format!("{}s", kind.to_ascii_lowercase()));
    Ok(ResourceKind::new(group, version, kind, &plural, namespaced))
}

async fn build_writer(cli: &Cli) -> Result<Arc<DualWriter>> {
    let t0 = Instant::now();
    let (kind, unified): (ResourceKind, Arc<dyn UnifiedStore>) = match cli.unified {
        Backend::Memory => {
            let kind = parse_kind(&cli.kind, cli.plural.as_deref(), !cli.cluster_scoped)?;
            (kind.clone(), Arc::new(MemoryStore::new(kind)))
        }
        Backend::Kube => {
            let store = KubeUnifiedStore::connect(&cli.kind).await?;
            (store.kind().clone(), Arc::new(store))
        }
    };
    let legacy = Arc::new(match &cli.db {
        Some(path) => SqliteLegacyStore::open(path, kind.clone())?,
        None => SqliteLegacyStore::open_default(kind.clone())?,
    });
    let legacy = if cli.legacy_read_only { legacy.read_only_storage() } else { legacy.legacy_storage() };

    let mut config = DualWriterConfig::from_env()?;
    if let Some(mode) = cli.mode {
        config = DualWriterConfig { default_mode: mode, overrides: BTreeMap::new() };
    }
    let registry = DualWriterRegistry::new(config);
    let dw = registry.register(&kind, legacy, unified)?;
    info!(resource = %kind.resource_key(), mode = %dw.mode(), backend = ?cli.unified, took_ms = %t0.elapsed().as_millis(), "dualctl: writer ready");
    Ok(dw)
}

fn read_objects(path: &str) -> Result<Vec<Resource>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
    let mut out = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(&text) {
        let v = serde_yaml::Value::deserialize(doc).with_context(|| format!("parsing {}", path))?;
        if v.is_null() {
            continue;
        }
        out.push(serde_yaml::from_value(v).with_context(|| format!("decoding object in {}", path))?);
    }
    Ok(out)
}

fn preconditions(uid: Option<String>, resource_version: Option<String>) -> Option<Preconditions> {
    if uid.is_none() && resource_version.is_none() {
        return None;
    }
    Some(Preconditions { uid, resource_version })
}

fn print<T: serde::Serialize>(output: Output, value: &T, human: impl FnOnce()) -> Result<()> {
    match output {
        Output::Human => human(),
        Output::Json => println!("{}", serde_json::to_string_pretty(value)?),
        Output::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

fn cell(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

fn print_table(table: &Table) {
    let mut widths: Vec<usize> = table.column_definitions.iter().map(|c| c.name.len()).collect();
    let rows: Vec<Vec<String>> = table.rows.iter().map(|r| r.cells.iter().map(cell).collect()).collect();
    for row in &rows {
        for (i, c) in row.iter().enumerate() {
            if i >= widths.len() {
                widths.push(0);
            }
            widths[i] = widths[i].max(c.len());
        }
    }
    let line = |cells: Vec<String>| {
        let padded: Vec<String> = cells.iter().enumerate().map(|(i, c)| format!("{:<w$}", c, w = widths[i])).collect();
        println!("{}", padded.join("   ").trim_end());
    };
    if !table.column_definitions.is_empty() {
        line(table.column_definitions.iter().map(|c| c.name.to_uppercase()).collect());
    }
    for row in rows {
        line(row);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let dw = build_writer(&cli).await?;
    let ctx = if dw.namespace_scoped() {
        RequestContext::namespaced(&cli.namespace)
    } else {
        RequestContext::cluster()
    }
    .with_request_id(uuid::Uuid::new_v4().to_string());
    debug!(request_id = %ctx.request_id, "dualctl: request context");

    let command = match &cli.command {
        Commands::Mode => "mode",
        Commands::Create { .. } => "create",
        Commands::Get { .. } => "get",
        Commands::List { .. } => "list",
        Commands::Update { .. } => "update",
        Commands::Delete { .. } => "delete",
        Commands::DeleteCollection { .. } => "delete_collection",
        Commands::Drift { .. } => "drift",
        Commands::Table { .. } => "table",
    };
    counter!("dualctl_commands_total", 1u64, "command" => command);

    match cli.command {
        Commands::Mode => {
            #[derive(serde::Serialize)]
            struct ModeReport { mode: Mode, capabilities: Vec<Capability>, table_source: dualwrite::TableSource }
            let report = ModeReport { mode: dw.mode(), capabilities: dw.legacy().capabilities(), table_source: dw.table_source() };
            print(cli.output, &report, || {
                let caps: Vec<&str> = report.capabilities.iter().map(|c| c.as_str()).collect();
                println!("mode: {}", report.mode);
                println!("legacy capabilities: {}", if caps.is_empty() { "(read-only)".to_string() } else { caps.join(", ") });
                println!("tables from: {:?}", report.table_source);
            })?;
        }
        Commands::Create { file, dry_run } => {
            let opts = CreateOptions { dry_run };
            for obj in read_objects(&file)? {
                let created = dw.create(&ctx, obj, None, &opts).await?;
                print(cli.output, &created, || println!("created {} (uid {})", created.key(), created.uid()))?;
            }
        }
        Commands::Get { name } => {
            let obj = dw.get(&ctx, &name, &GetOptions::default()).await?;
            print(cli.output, &obj, || {
                println!("{} rv={} uid={}", obj.key(), obj.resource_version(), obj.uid());
                println!("{}", serde_json::to_string_pretty(&obj.spec).unwrap_or_default());
            })?;
        }
        Commands::List { selector, limit, continue_token } => {
            let opts = ListOptions { label_selector: selector, limit, continue_token };
            let list = dw.list(&ctx, &opts).await?;
            print(cli.output, &list, || {
                for o in &list.items {
                    println!("{}", o.key());
                }
                if let Some(t) = &list.continue_token {
                    eprintln!("more results: --continue {}", t);
                }
            })?;
        }
        Commands::Update { file, force_create, resource_version, uid, dry_run } => {
            let mut objs = read_objects(&file)?;
            if objs.len() != 1 {
                return Err(anyhow!("{}: expected exactly one object, found {}", file, objs.len()));
            }
            let desired = objs.remove(0);
            let name = desired.name().to_string();
            let mut info = UpdateFn::new(move |_old: Option<&Resource>| Ok(desired.clone()));
            if let Some(p) = preconditions(uid, resource_version) {
                info = info.with_preconditions(p);
            }
            let (obj, created) = dw.update(&ctx, &name, &info, None, None, force_create, &UpdateOptions { dry_run }).await?;
            print(cli.output, &obj, || {
                let verb = if created { "created" } else { "updated" };
                println!("{} {} rv={}", verb, obj.key(), obj.resource_version());
            })?;
        }
        Commands::Delete { name, resource_version, uid, dry_run } => {
            let opts = DeleteOptions { preconditions: preconditions(uid, resource_version), dry_run };
            let (obj, pending) = dw.delete(&ctx, &name, None, &opts).await?;
            print(cli.output, &obj, || {
                let note = if pending { " (pending)" } else { "" };
                println!("deleted {}{}", obj.key(), note);
            })?;
        }
        Commands::DeleteCollection { selector, dry_run } => {
            let list_opts = ListOptions { label_selector: selector, ..Default::default() };
            let opts = DeleteOptions { preconditions: None, dry_run };
            let gone = dw.delete_collection(&ctx, None, &opts, &list_opts).await?;
            print(cli.output, &gone, || {
                for o in &gone.items {
                    println!("deleted {}", o.key());
                }
                println!("{} object(s)", gone.len());
            })?;
        }
        Commands::Drift { selector, only_drifted } => {
            let opts = ListOptions { label_selector: selector, ..Default::default() };
            let mut entries = dw.drift(&ctx, &opts).await?;
            if only_drifted {
                entries.retain(|e| e.state != dualwrite::DriftState::InSync);
            }
            print(cli.output, &entries, || {
                println!("{:<40} STATE", "OBJECT");
                for e in &entries {
                    println!("{:<40} {:?}", e.key.to_string(), e.state);
                }
            })?;
        }
        Commands::Table { selector, no_headers } => {
            let list = dw.list(&ctx, &ListOptions { label_selector: selector, ..Default::default() }).await?;
            let table = dw.convert_to_table(&ctx, TableInput::List(&list), &TableOptions { no_headers, include_object: false })?;
            print(cli.output, &table, || print_table(&table))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_flag_forms() {
        let k = parse_kind("dashboard.example.io/v1/Dashboard", None, true).unwrap();
        assert_eq!(k.plural, "dashboards");
        assert_eq!(k.resource_key(), "dashboards.dashboard.example.io");
        let k = parse_kind("v1/ConfigMap", Some("configmaps"), true).unwrap();
        assert_eq!(k.group, "");
        assert!(parse_kind("Dashboard", None, true).is_err());
    }

    #[test]
    fn preconditions_only_when_asked() {
        assert_eq!(preconditions(None, None), None);
        assert_eq!(
            preconditions(None, Some("7".into())),
            Some(Preconditions { uid: None, resource_version: Some("7".into()) })
        );
    }

    #[test]
    fn reads_multi_document_yaml() {
        let path = std::env::temp_dir().join(format!("dualctl-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "metadata:\n  name: cpu\nspec:\n  title: CPU\n---\n---\napiVersion: dashboard.example.io/v1\nmetadata:\n  name: mem\n",
        )
        .unwrap();
        let objs = read_objects(path.to_str().unwrap()).unwrap();
        assert_eq!(objs.iter().map(|o| o.name()).collect::<Vec<_>>(), vec!["cpu", "mem"]);
        assert_eq!(objs[0].spec["title"], "CPU");
        let _ = std::fs::remove_file(&path);
    }
}
