use clap::{Parser, Subcommand};
use radius_provision::audit::{AuditEntry, AuditEventType, AuditLogger};
use radius_provision::config::{Config, ConfigError, DATABASE_URL_ENV};
use radius_provision::directory::{DirectoryManager, PgDirectoryStore};
use radius_provision::probe::{ProbeRequest, RadiusProbe};
use radius_provision::reconcile::Reconciler;
use radius_provision::resolver::IpResolver;
use radius_provision::service::PgServiceRepository;
use radius_provision::vendor::VendorProfile;
use radius_provision::{db, CredentialStatus};
use std::error::Error;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type CliResult = Result<(), Box<dyn Error>>;

/// RADIUS provisioning tools for PPPoE service networks
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "radius-provision")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "CONFIG", default_value = "config.json")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write an example configuration file
    Init,
    /// Validate configuration and exit
    Validate,
    /// Show the NAS-IP-Address this host would advertise
    DetectIp {
        /// Manual address, tried after RADIUS_IP
        #[arg(long)]
        manual: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Send a test Access-Request to a RADIUS server
    TestRadius {
        #[arg(long, required_unless_present = "router", conflicts_with = "router")]
        host: Option<String>,
        /// Use host and secret of a configured router
        #[arg(long)]
        router: Option<i64>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        secret: Option<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Manual NAS-IP-Address
        #[arg(long)]
        nas_ip: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show the RADIUS credential stored for a username
    Lookup {
        username: String,
        #[arg(long)]
        json: bool,
    },
    /// Rewrite a username's speed attributes from a service plan
    SyncSpeed {
        username: String,
        #[arg(long)]
        plan: i64,
        /// mikrotik, ubiquiti, juniper or generic (default from config)
        #[arg(long)]
        vendor: Option<String>,
    },
    /// Repair drift between billing and the RADIUS tables
    Reconcile {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config) {
        Ok(cfg) => Some(cfg),
        Err(ConfigError::Io(ref e)) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            eprintln!("❌ Configuration error in {}: {}", cli.config, e);
            process::exit(1);
        }
    };

    match cli.command {
        Command::Init => {
            if config.is_some() {
                eprintln!("{} already exists, leaving it untouched", cli.config);
                process::exit(1);
            }
            if let Err(e) = Config::example().to_file(&cli.config) {
                eprintln!("Error creating example config: {}", e);
                process::exit(1);
            }
            println!("Wrote example configuration to {}", cli.config);
            process::exit(0);
        }
        Command::Validate => {
            let Some(config) = config else {
                eprintln!("❌ Configuration file not found: {}", cli.config);
                process::exit(1);
            };
            let config = config.with_env_overrides();
            if let Err(e) = config.validate() {
                eprintln!("❌ Configuration validation failed!");
                eprintln!("   Error: {}", e);
                process::exit(1);
            }
            print_summary(&config);
            process::exit(0);
        }
        _ => {}
    }

    let loaded = config.is_some();
    let config = config.unwrap_or_default().with_env_overrides();
    if let Err(e) = config.validate() {
        eprintln!("❌ Invalid configuration: {}", e);
        process::exit(1);
    }

    let log_level = config.log_level.as_deref().unwrap_or("info");
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if !loaded {
        warn!("Could not load config file from: {}, using defaults", cli.config);
    }

    let result = match cli.command {
        Command::DetectIp { manual, json } => detect_ip(&config, manual, json),
        Command::TestRadius {
            host,
            router,
            port,
            secret,
            username,
            password,
            timeout_ms,
            nas_ip,
            json,
        } => {
            let mut request = match build_probe_request(&config, host, router, secret) {
                Ok(request) => request,
                Err(e) => {
                    error!("{}", e);
                    process::exit(1);
                }
            };
            if let Some(port) = port {
                request = request.with_port(port);
            }
            if username.is_some() || password.is_some() {
                let username = username.unwrap_or_else(|| request.username.clone());
                let password = password.unwrap_or_else(|| request.password.clone());
                request = request.with_credentials(username, password);
            }
            if let Some(ms) = timeout_ms {
                request = request.with_timeout(Duration::from_millis(ms));
            }
            if let Some(ip) = nas_ip.or_else(|| config.nas.manual_override.clone()) {
                request = request.with_nas_address(ip);
            }
            test_radius(&config, request, json).await
        }
        Command::Lookup { username, json } => lookup(&config, &username, json).await,
        Command::SyncSpeed {
            username,
            plan,
            vendor,
        } => sync_speed(&config, &username, plan, vendor).await,
        Command::Reconcile { json } => reconcile(&config, json).await,
        Command::Init | Command::Validate => Ok(()),
    };

    if let Err(e) = result {
        error!("{}", e);
        process::exit(1);
    }
}

fn print_summary(config: &Config) {
    println!("✓ Configuration validated successfully!");
    println!();
    println!("Configuration summary:");
    match config.nas.advertised_ip {
        Some(ref ip) => println!("  NAS address: {} (advertised)", ip),
        None => println!("  NAS address: auto-detect"),
    }
    println!("  Probe: port {}, timeout {} ms", config.probe.port, config.probe.timeout_ms);
    match config.database {
        Some(ref db) => println!("  Database: {}", db::mask_url(&db.url)),
        None => println!("  Database: not configured (set {})", DATABASE_URL_ENV),
    }
    println!("  Default vendor: {}", config.default_vendor);
    println!("  Reconcile batch: {}", config.reconcile_batch_size);
    println!("  Log level: {}", config.log_level.as_deref().unwrap_or("info"));
    if let Some(ref path) = config.audit_log_path {
        println!("  Audit log: {}", path);
    }

    if !config.routers.is_empty() {
        println!();
        println!("Routers:");
        for router in &config.routers {
            let name = router.name.as_deref().unwrap_or("(unnamed)");
            println!(
                "  {} {} - {} ({})",
                router.id,
                name,
                router.radius_host,
                VendorProfile::from_router_type(&router.router_type)
            );
        }
    }
}

fn detect_ip(config: &Config, manual: Option<String>, json: bool) -> CliResult {
    let resolver = IpResolver::from_config(&config.nas)?;
    let manual = manual.or_else(|| config.nas.manual_override.clone());

    match resolver.resolve(manual.as_deref()) {
        Ok(resolution) => {
            if json {
                let out = serde_json::json!({
                    "success": true,
                    "address": resolution.address,
                    "warnings": resolution.warnings,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                let address = &resolution.address;
                println!("NAS-IP-Address: {}", address.address);
                println!("  Interface: {}", address.interface_name);
                println!("  Classification: {:?}", address.classification);
                println!("  Source: {}", address.source);
                for warning in &resolution.warnings {
                    println!("  ⚠️  {}", warning);
                }
            }
            Ok(())
        }
        Err(e) => {
            if json {
                let out = serde_json::json!({
                    "success": false,
                    "error": e.to_string(),
                    "warnings": e.warnings,
                    "errors": e.errors,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
                process::exit(1);
            }
            Err(e.into())
        }
    }
}

fn build_probe_request(
    config: &Config,
    host: Option<String>,
    router: Option<i64>,
    secret: Option<String>,
) -> Result<ProbeRequest, String> {
    let (host, configured_secret) = match (host, router) {
        (Some(host), _) => (host, None),
        (None, Some(id)) => {
            let router = config
                .router(id)
                .ok_or_else(|| format!("Router {} is not configured", id))?;
            (router.radius_host.clone(), Some(router.secret.clone()))
        }
        (None, None) => return Err("Either --host or --router is required".to_string()),
    };
    let secret = secret
        .or(configured_secret)
        .ok_or_else(|| "A shared secret is required (--secret)".to_string())?;
    Ok(ProbeRequest::from_config(&config.probe, host, secret))
}

async fn test_radius(config: &Config, request: ProbeRequest, json: bool) -> CliResult {
    let resolver = Arc::new(IpResolver::from_config(&config.nas)?);
    let probe = RadiusProbe::new(resolver);
    let result = probe.test_connection(&request).await;

    audit_logger(config)
        .log(
            AuditEntry::new(AuditEventType::RadiusProbe)
                .with_operation(format!("{}:{}", request.host, request.port))
                .with_details(result.message.clone()),
        )
        .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        let mark = if result.success { "✓" } else { "✗" };
        println!("{} {}", mark, result.message);
        let details = &result.details;
        println!("  Server: {}:{}", details.host, details.port);
        if let Some(ref nas) = details.nas_address {
            println!("  NAS-IP-Address: {} ({})", nas.address, nas.source);
        }
        println!("  Status: {} in {} ms", details.status, details.elapsed_ms);
        if let Some(valid) = details.authenticator_valid {
            println!("  Response authenticator valid: {}", valid);
        }
        for attribute in &details.reply_attributes {
            println!("  Reply: {}", attribute);
        }
        for warning in &details.warnings {
            println!("  ⚠️  {}", warning);
        }
    }

    if !result.success {
        process::exit(1);
    }
    Ok(())
}

fn audit_logger(config: &Config) -> AuditLogger {
    match AuditLogger::new(config.audit_log_path.clone()) {
        Ok(logger) => logger,
        Err(e) => {
            warn!("Audit log unavailable, continuing without it: {}", e);
            AuditLogger::disabled()
        }
    }
}

async fn directory_manager(
    config: &Config,
) -> Result<(Arc<DirectoryManager>, Arc<PgServiceRepository>), Box<dyn Error>> {
    let database = config
        .database
        .as_ref()
        .ok_or_else(|| format!("No database configured (set {})", DATABASE_URL_ENV))?;
    let pool = db::connect(database).await?;

    let services = Arc::new(PgServiceRepository::new(pool.clone()));
    let directory = Arc::new(DirectoryManager::new(
        Arc::new(PgDirectoryStore::new(pool)),
        services.clone(),
        VendorProfile::from_router_type(&config.default_vendor),
    ));
    Ok((directory, services))
}

async fn lookup(config: &Config, username: &str, json: bool) -> CliResult {
    let (directory, _) = directory_manager(config).await?;
    let credential = directory.lookup(username).await?;
    let online = directory.is_online(username).await?;

    if json {
        let out = serde_json::json!({
            "username": username,
            "credential": credential,
            "online": online,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let Some(credential) = credential else {
        println!("{}: no RADIUS rows", username);
        return Ok(());
    };
    let status = match credential.status {
        CredentialStatus::Active => "active",
        CredentialStatus::Suspended => "suspended",
        CredentialStatus::Absent => "absent",
    };
    println!("{} ({}, {})", username, status, if online { "online" } else { "offline" });
    if let Some(speed) = credential.speed() {
        println!("  Speed: {} via {}", speed, credential.vendor.map_or("unknown", |v| v.as_str()));
    }
    if let Some(ip) = credential.framed_ip_address {
        println!("  Framed-IP-Address: {}", ip);
    }
    if let Some(ref nas) = credential.nas_identifier {
        println!("  NAS-Identifier: {}", nas);
    }
    Ok(())
}

async fn sync_speed(
    config: &Config,
    username: &str,
    plan: i64,
    vendor: Option<String>,
) -> CliResult {
    let (directory, _) = directory_manager(config).await?;
    let vendor = vendor
        .map(|v| VendorProfile::from_router_type(&v))
        .unwrap_or_else(|| directory.default_vendor());

    let outcome = directory.sync_speed(username, plan, vendor).await;
    if outcome.success {
        println!("✓ {}", outcome.detail());
        Ok(())
    } else {
        Err(outcome.to_string().into())
    }
}

async fn reconcile(config: &Config, json: bool) -> CliResult {
    let (directory, services) = directory_manager(config).await?;
    let reconciler = Reconciler::new(
        services.clone(),
        services,
        directory,
        config.reconcile_batch_size,
    );
    let report = reconciler.sweep().await?;

    audit_logger(config)
        .log(AuditEntry::new(AuditEventType::DirectoryReconciled).with_details(format!(
            "examined {}, provisioned {}, suspended {}, failed {}",
            report.examined,
            report.provisioned,
            report.suspended,
            report.failures.len()
        )))
        .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Examined {} services: {} in sync, {} provisioned, {} suspended, {} skipped",
            report.examined, report.in_sync, report.provisioned, report.suspended, report.skipped
        );
        for failure in &report.failures {
            println!(
                "  ✗ service {} ({}): {}",
                failure.service_id, failure.username, failure.outcome
            );
        }
    }

    if !report.failures.is_empty() {
        process::exit(1);
    }
    Ok(())
}
