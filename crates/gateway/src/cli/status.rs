//! `callrelay status`: one-shot view of the relay from outside the gateway.

use std::time::Duration;

use serde::Deserialize;

use cr_domain::call::MetricsSnapshot;
use cr_domain::config::Config;

#[derive(Debug, Deserialize)]
struct RelayHealth {
    status: String,
    #[serde(default)]
    uptime_secs: Option<u64>,
    #[serde(default)]
    active_calls: Option<u64>,
}

/// Print relay health and metrics. Returns `false` when the relay is not
/// reachable or not healthy.
pub async fn run(config: &Config) -> anyhow::Result<bool> {
    let base = config.relay.local_base_url();
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.supervisor.health_timeout_ms))
        .build()?;

    println!("relay {base}");

    if let Some(path) = config.server.pid_file.as_deref() {
        match super::pid::read_pid(path) {
            Some(pid) => println!("  gateway pid:  {pid}"),
            None => println!("  gateway pid:  not running ({})", path.display()),
        }
    }

    let health = match client.get(format!("{base}/health")).send().await {
        Ok(resp) if resp.status().is_success() => resp.json::<RelayHealth>().await.ok(),
        Ok(resp) => {
            println!("  health:       unhealthy (HTTP {})", resp.status().as_u16());
            return Ok(false);
        }
        Err(e) => {
            println!("  health:       unreachable ({e})");
            return Ok(false);
        }
    };

    match health {
        Some(h) => {
            println!("  health:       {}", h.status);
            if let Some(up) = h.uptime_secs {
                println!("  uptime:       {}", format_uptime(up));
            }
            if let Some(active) = h.active_calls {
                println!("  active calls: {active}");
            }
        }
        None => println!("  health:       healthy (unrecognised body)"),
    }

    match client.get(format!("{base}/metrics")).send().await {
        Ok(resp) if resp.status().is_success() => {
            if let Ok(m) = resp.json::<MetricsSnapshot>().await {
                println!("  calls started: {}", m.calls_started);
                println!("  errors:        {}", m.errors);
                println!("  reconnects:    {}", m.reconnects);
            }
        }
        Ok(_) | Err(_) => println!("  metrics:      unavailable"),
    }

    Ok(true)
}

fn format_uptime(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m}m {s}s")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_formatting() {
        assert_eq!(format_uptime(5), "5s");
        assert_eq!(format_uptime(125), "2m 5s");
        assert_eq!(format_uptime(3725), "1h 2m 5s");
    }
}
