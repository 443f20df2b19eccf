use std::path::{Path, PathBuf};
use std::time::Duration;

use cr_domain::config::{Config, ConfigSeverity, DispatchMode};
use cr_supervisor::{HealthCheck, HttpHealthProber};

/// Run all diagnostic checks and print a summary.
///
/// Returns `Ok(true)` when every check passes, `Ok(false)` when at least
/// one check failed.
pub async fn run(config: &Config, config_path: &str) -> anyhow::Result<bool> {
    println!("callrelay doctor");
    println!("================\n");

    let mut all_passed = true;

    // 1. Config file
    check_config_file(config_path);

    // 2. Config validation
    check_config_validation(config, &mut all_passed);

    // 3. Provider credentials
    check_credentials(config, &mut all_passed);

    // 4. Relay installation
    check_relay_installation(config, &mut all_passed);

    // 5. Relay health
    check_relay_health(config, &mut all_passed).await;

    // Summary
    println!();
    if all_passed {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. Review the output above.");
    }

    Ok(all_passed)
}

// ── Individual checks ─────────────────────────────────────────────────

/// Informational only: defaults plus environment overrides are a valid setup.
fn check_config_file(config_path: &str) {
    let exists = Path::new(config_path).exists();
    print_check(
        "Config file",
        true,
        if exists {
            config_path.to_owned()
        } else {
            format!("{config_path} not found (using defaults and environment)")
        },
    );
}

fn check_config_validation(config: &Config, all_passed: &mut bool) {
    let issues = config.validate();
    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();

    if issues.is_empty() {
        print_check("Config validation", true, "no issues".into());
    } else {
        print_check(
            "Config validation",
            error_count == 0,
            format!("{} issue(s) ({} error(s))", issues.len(), error_count),
        );
        for issue in &issues {
            println!("      {issue}");
        }
        if error_count > 0 {
            *all_passed = false;
        }
    }
}

fn check_credentials(config: &Config, all_passed: &mut bool) {
    let missing = config.relay.credentials.missing();
    let ok = missing.is_empty();
    print_check(
        "Provider credentials",
        ok,
        if ok {
            "all set".into()
        } else {
            format!("missing {}", missing.join(", "))
        },
    );
    if !ok {
        *all_passed = false;
    }
}

fn check_relay_installation(config: &Config, all_passed: &mut bool) {
    if config.dispatch.mode == DispatchMode::Direct {
        print_check("Relay installation", true, "not needed in direct mode".into());
        return;
    }

    let relay = &config.relay;
    if let Some(ref dir) = relay.working_dir {
        if !dir.is_dir() {
            print_check(
                "Relay installation",
                false,
                format!("{} does not exist", dir.display()),
            );
            *all_passed = false;
            return;
        }
    }

    let (ok, detail) = match relay.command {
        None => (true, "bundled relay (`callrelay relay`)".to_owned()),
        Some(ref cmd) => match resolve_command(cmd, relay.working_dir.as_deref()) {
            Some(path) => (true, path.display().to_string()),
            None => (false, format!("`{cmd}` not found")),
        },
    };
    print_check("Relay installation", ok, detail);
    if !ok {
        *all_passed = false;
    }
}

async fn check_relay_health(config: &Config, all_passed: &mut bool) {
    let prober = HttpHealthProber::for_port(
        config.relay.port,
        Duration::from_millis(config.supervisor.health_timeout_ms),
        Duration::from_millis(config.supervisor.health_poll_interval_ms),
    );
    let healthy = prober.is_healthy().await;

    // A stopped relay is expected when no gateway is running.
    let ok = healthy || !config.supervisor.enabled || config.dispatch.mode == DispatchMode::Direct;
    print_check(
        "Relay health",
        ok,
        if healthy {
            format!("{} (healthy)", prober.url())
        } else {
            format!("{} (not responding)", prober.url())
        },
    );
    if !ok {
        *all_passed = false;
    }
}

/// Locate `cmd` the way a spawn would: paths are checked directly (relative
/// to `working_dir`), bare names are searched on `PATH`.
fn resolve_command(cmd: &str, working_dir: Option<&Path>) -> Option<PathBuf> {
    let as_path = Path::new(cmd);
    if as_path.components().count() > 1 || as_path.is_absolute() {
        let full = match working_dir {
            Some(dir) if as_path.is_relative() => dir.join(as_path),
            _ => as_path.to_path_buf(),
        };
        return full.is_file().then_some(full);
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(cmd))
        .find(|candidate| candidate.is_file())
}

// ── Formatting helper ─────────────────────────────────────────────────

fn print_check(name: &str, passed: bool, detail: String) {
    let status = if passed { "PASS" } else { "FAIL" };
    println!("  [{status}] {name}: {detail}");
}
