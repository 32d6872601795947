use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};
use vsync_apply::{plan, strip_noisy, DiffSummary};
use vsync_core::{
    EventSink, NameResolver, PatchError, PatchInterpreter, PatchOp, PatchRule, Resource, MANAGED_BY_LABEL,
};
use vsync_kubehub::{KubeEvents, KubeStorage};
use vsync_store::{MemoryStorage, NameCacheStore};
use vsync_sync::{physical_name, Config, FromVirtualCluster, FromVirtualSyncer, NamespacedTranslator, SyncAction, SyncContext};

#[derive(Parser, Debug)]
#[command(name = "vsyncctl", version, about = "vsync CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load and validate a syncer config
    CheckConfig {
        #[arg(env = "VSYNC_CONFIG")]
        file: PathBuf,
    },
    /// Print the physical name of a virtual object
    PhysicalName {
        name: String,
        namespace: String,
        #[arg(long, env = "VSYNC_SUFFIX")]
        suffix: String,
    },
    /// Show the body and status patches between two documents
    Diff {
        before: PathBuf,
        after: PathBuf,
        /// Treat status as a separately written subresource
        #[arg(long = "status-subresource", action = ArgAction::SetTrue)]
        status_subresource: bool,
    },
    /// Run one sync pass against in-memory storage
    Simulate {
        /// Virtual object (YAML)
        virtual_file: PathBuf,
        /// Existing physical object (YAML)
        #[arg(long)]
        physical: Option<PathBuf>,
        #[arg(long, env = "VSYNC_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Run one sync pass for a single virtual object against the current cluster
    Reconcile {
        /// Mapped kind, e.g. "Widget"
        kind: String,
        namespace: String,
        name: String,
        #[arg(long, env = "VSYNC_CONFIG")]
        config: PathBuf,
        /// Run even though the mapping declares rules this command cannot apply
        #[arg(long = "allow-unapplied-rules", action = ArgAction::SetTrue)]
        allow_unapplied_rules: bool,
    },
}

fn init_tracing() {
    let env = std::env::var("VSYNC_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("VSYNC_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid VSYNC_METRICS_ADDR; expected host:port");
        }
    }
}

/// Ignores every rule: the physical copy carries translated metadata only.
struct PassThrough;

impl PatchInterpreter for PassThrough {
    fn apply(&self, _: &mut Resource, _: &Resource, _: &[PatchRule], _: &dyn NameResolver) -> Result<(), PatchError> {
        Ok(())
    }
}

/// Rules the pass-through interpreter will not apply; refused unless `allow`.
fn unapplied_rules(mapping: &FromVirtualCluster, allow: bool) -> Result<usize> {
    let n = mapping.patches.len() + mapping.reverse_patches.len();
    if n == 0 {
        return Ok(0);
    }
    if !allow {
        return Err(anyhow!(
            "mapping for {} declares {n} rule(s) that vsyncctl cannot apply; pass --allow-unapplied-rules to sync metadata only",
            mapping.kind
        ));
    }
    warn!(kind = %mapping.kind, patches = mapping.patches.len(), reverse = mapping.reverse_patches.len(), "rules not applied; physical copy carries translated metadata only");
    Ok(n)
}

struct LogEvents;

impl EventSink for LogEvents {
    fn record_warning(&self, obj: &Resource, reason: &str, message: &str) {
        warn!(obj = %obj.object_ref(), reason, message, "event");
    }
}

fn env_override(name: &str) -> Option<String> { std::env::var(name).ok().filter(|v| !v.trim().is_empty()) }

fn apply_overrides(mut cfg: Config, suffix: Option<String>, target_namespace: Option<String>) -> Result<Config> {
    if let Some(s) = suffix {
        cfg.suffix = s;
    }
    if let Some(ns) = target_namespace {
        cfg.target_namespace = ns;
    }
    cfg.validate()?;
    Ok(cfg)
}

fn load_config(path: &Path) -> Result<Config> {
    let cfg = Config::load(path)?;
    apply_overrides(cfg, env_override("VSYNC_SUFFIX"), env_override("VSYNC_TARGET_NAMESPACE"))
}

fn read_resource(path: &Path) -> Result<Resource> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let v: serde_json::Value = serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Resource::from_value(v)?)
}

fn read_doc(path: &Path) -> Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let v: serde_json::Value = serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(strip_noisy(v))
}

/// Mapping for `kind` from the config, or a bare one (no selector, no rules).
fn mapping_or_default(cfg: Option<&Config>, obj: &Resource) -> FromVirtualCluster {
    cfg.and_then(|c| c.mapping_for(obj.kind(), Some(obj.api_version())))
        .cloned()
        .unwrap_or_else(|| FromVirtualCluster::new(obj.kind(), obj.api_version()))
}

fn print_ops(label: &str, ops: &[PatchOp]) {
    let s = DiffSummary::of(ops);
    println!("{label}: +{} ~{} -{}", s.adds, s.updates, s.removes);
    for op in ops {
        match op {
            PatchOp::Add { path, value } => println!("  + {path} = {value}"),
            PatchOp::Replace { path, value } => println!("  ~ {path} = {value}"),
            PatchOp::Remove { path } => println!("  - {path}"),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PassReport {
    syncer: String,
    action: SyncAction,
    writes: Vec<String>,
    rules_skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    physical: Option<serde_json::Value>,
}

fn print_report(output: Output, report: &PassReport) -> Result<()> {
    match output {
        Output::Human => {
            println!("{}: {:?}", report.syncer, report.action);
            if report.rules_skipped > 0 {
                println!("  ({} rule(s) not applied)", report.rules_skipped);
            }
            for w in &report.writes {
                println!("  {w}");
            }
            if let Some(p) = &report.physical {
                println!("---\n{}", serde_yaml::to_string(p)?);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(report)?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig { file } => {
            let cfg = load_config(&file)?;
            info!(path = %file.display(), mappings = cfg.mappings.len(), "config ok");
            match cli.output {
                Output::Human => {
                    println!("suffix: {}", cfg.suffix);
                    println!("targetNamespace: {}", cfg.target_namespace);
                    for m in &cfg.mappings {
                        let fv = &m.from_virtual_cluster;
                        let sel = fv.label_selector().map(|s| s.to_string()).unwrap_or_else(|| "(all)".to_string());
                        println!(
                            "{} • {} • selector {} • {} patches • {} reverse",
                            fv.api_version,
                            fv.kind,
                            sel,
                            fv.patches.len(),
                            fv.reverse_patches.len()
                        );
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&cfg)?),
            }
        }
        Commands::PhysicalName { name, namespace, suffix } => {
            let out = physical_name(&name, &namespace, &suffix);
            match cli.output {
                Output::Human => println!("{out}"),
                Output::Json => println!("{}", serde_json::json!({"virtual": name, "namespace": namespace, "physical": out})),
            }
        }
        Commands::Diff { before, after, status_subresource } => {
            let b = read_doc(&before)?;
            let a = read_doc(&after)?;
            let p = plan(&b, &a, status_subresource);
            match cli.output {
                Output::Human => {
                    if p.is_empty() {
                        println!("no changes");
                    } else {
                        print_ops("body", &p.body);
                        if status_subresource {
                            print_ops("status", &p.status);
                        }
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&p)?),
            }
        }
        Commands::Simulate { virtual_file, physical, config } => {
            let cfg = config.as_deref().map(load_config).transpose()?;
            let virtual_obj = read_resource(&virtual_file)?;
            let physical_obj = physical.as_deref().map(read_resource).transpose()?;
            let (suffix, target_ns) = match &cfg {
                Some(c) => (c.suffix.clone(), c.target_namespace.clone()),
                None => (
                    env_override("VSYNC_SUFFIX").unwrap_or_else(|| "vsync".to_string()),
                    env_override("VSYNC_TARGET_NAMESPACE").unwrap_or_else(|| "default".to_string()),
                ),
            };

            let physical_store = MemoryStorage::new();
            let virtual_store = MemoryStorage::new();
            let names = NameCacheStore::new();
            virtual_store.insert(virtual_obj.clone());
            if let Some(p) = &physical_obj {
                names.index_physical(p);
                physical_store.insert(p.clone());
            }

            let (where_ns, where_name) = match &physical_obj {
                Some(p) => (p.namespace().unwrap_or_default().to_string(), p.name().to_string()),
                None => (
                    target_ns.clone(),
                    physical_name(virtual_obj.name(), virtual_obj.namespace().unwrap_or_default(), &suffix),
                ),
            };
            let mapping = mapping_or_default(cfg.as_ref(), &virtual_obj);
            let rules_skipped = unapplied_rules(&mapping, true)?;
            let syncer = FromVirtualSyncer::new(
                mapping,
                Arc::new(NamespacedTranslator::new(suffix, target_ns)),
                Arc::new(PassThrough),
            );
            let cache = names.handle();
            let ctx = SyncContext {
                physical_client: &physical_store,
                virtual_client: &virtual_store,
                name_cache: &cache,
                events: &LogEvents,
            };
            let action = syncer.dispatch(&ctx, &virtual_obj, physical_obj.as_ref()).await?;

            let mut writes: Vec<String> = physical_store.journal().iter().map(|w| format!("physical {w:?}")).collect();
            writes.extend(virtual_store.journal().iter().map(|w| format!("virtual {w:?}")));
            let physical_after = physical_store.get(Some(where_ns.as_str()).filter(|ns| !ns.is_empty()), &where_name).map(Resource::into_value);
            print_report(cli.output, &PassReport { syncer: syncer.name(), action, writes, rules_skipped, physical: physical_after })?;
        }
        Commands::Reconcile { kind, namespace, name, config, allow_unapplied_rules } => {
            let started = Instant::now();
            let cfg = load_config(&config)?;
            let mapping = cfg
                .mapping_for(&kind, None)
                .cloned()
                .ok_or_else(|| anyhow!("no mapping for kind {kind} in {}", config.display()))?;
            let rules_skipped = unapplied_rules(&mapping, allow_unapplied_rules)?;
            let gvk = vsync_kubehub::parse_gvk_key(&format!("{}/{}", mapping.api_version, mapping.kind))?;

            let client = vsync_kubehub::client().await?;
            let storage = KubeStorage::new(client.clone(), "vsync");
            let events = KubeEvents::new(client, "vsync", Some(cfg.suffix.clone()));

            let virtual_obj = storage
                .get(&gvk, Some(&namespace), &name)
                .await?
                .ok_or_else(|| anyhow!("virtual {kind} {namespace}/{name} not found"))?;
            let pname = physical_name(&name, &namespace, &cfg.suffix);
            let physical_obj = storage.get(&gvk, Some(&cfg.target_namespace), &pname).await?;

            let names = NameCacheStore::new();
            let managed = format!("{MANAGED_BY_LABEL}={}", cfg.suffix);
            for p in storage.list(&gvk, Some(&cfg.target_namespace), Some(&managed)).await? {
                names.index_physical(&p);
            }
            info!(kind = %kind, namespace = %namespace, name = %name, cached = names.len(), "reconcile");

            let syncer = FromVirtualSyncer::new(
                mapping,
                Arc::new(NamespacedTranslator::new(cfg.suffix.clone(), cfg.target_namespace.clone())),
                Arc::new(PassThrough),
            );
            let cache = names.handle();
            let ctx = SyncContext { physical_client: &storage, virtual_client: &storage, name_cache: &cache, events: &events };
            let dispatched = syncer.dispatch(&ctx, &virtual_obj, physical_obj.as_ref()).await;
            events.flush().await;
            let action = dispatched?;
            metrics::histogram!("vsync_reconcile_latency_ms", started.elapsed().as_secs_f64() * 1000.0);

            let physical_after = storage.get(&gvk, Some(&cfg.target_namespace), &pname).await?.map(Resource::into_value);
            print_report(
                cli.output,
                &PassReport { syncer: syncer.name(), action, writes: Vec::new(), rules_skipped, physical: physical_after },
            )?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CFG: &str = "suffix: vc\ntargetNamespace: host\nmappings:\n  - fromVirtualCluster:\n      kind: Widget\n      apiVersion: example.com/v1\n      selector:\n        labelSelector:\n          env: prod\n";

    fn widget() -> Resource {
        Resource::from_value(json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": {"name": "a", "namespace": "ns", "labels": {"env": "prod"}}
        }))
        .unwrap()
    }

    #[test]
    fn overrides_win_and_are_validated() {
        let cfg = Config::from_yaml(CFG).unwrap();
        let cfg = apply_overrides(cfg, Some("other".into()), None).unwrap();
        assert_eq!(cfg.suffix, "other");
        assert_eq!(cfg.target_namespace, "host");
        assert!(apply_overrides(cfg, None, Some(" ".into())).is_err());
    }

    #[test]
    fn unmapped_kinds_get_a_bare_mapping() {
        let cfg = Config::from_yaml(CFG).unwrap();
        assert!(mapping_or_default(Some(&cfg), &widget()).label_selector().is_some());
        let bare = mapping_or_default(None, &widget());
        assert!(bare.label_selector().is_none());
        assert!(bare.patches.is_empty());
    }

    #[test]
    fn declared_rules_are_refused_unless_allowed() {
        let bare = FromVirtualCluster::new("Widget", "example.com/v1");
        assert_eq!(unapplied_rules(&bare, false).unwrap(), 0);

        let mut ruled = bare.clone();
        ruled.patches = vec![PatchRule(json!({"op": "copy", "path": "spec"}))];
        ruled.reverse_patches = vec![PatchRule(json!({"op": "copy", "path": "status"}))];
        let err = unapplied_rules(&ruled, false).unwrap_err();
        assert!(err.to_string().contains("--allow-unapplied-rules"), "{err}");
        assert_eq!(unapplied_rules(&ruled, true).unwrap(), 2);
    }

    #[test]
    fn report_marks_skipped_rules() {
        let report = PassReport {
            syncer: "Widget-from-virtual-syncer".into(),
            action: SyncAction::Created,
            writes: Vec::new(),
            rules_skipped: 2,
            physical: None,
        };
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["rulesSkipped"], json!(2));
        assert!(v.get("physical").is_none());
    }

    #[tokio::test]
    async fn pass_through_creates_metadata_only_copy() {
        let physical = MemoryStorage::new();
        let virtual_side = MemoryStorage::new();
        let names = NameCacheStore::new();
        let cache = names.handle();
        let syncer = FromVirtualSyncer::new(
            FromVirtualCluster::new("Widget", "example.com/v1"),
            Arc::new(NamespacedTranslator::new("vc", "host")),
            Arc::new(PassThrough),
        );
        let ctx = SyncContext { physical_client: &physical, virtual_client: &virtual_side, name_cache: &cache, events: &LogEvents };
        assert_eq!(syncer.dispatch(&ctx, &widget(), None).await.unwrap(), SyncAction::Created);
        let p = physical.get(Some("host"), "a-x-ns-x-vc").unwrap();
        assert_eq!(p.labels().get(MANAGED_BY_LABEL).map(String::as_str), Some("vc"));
    }
}
