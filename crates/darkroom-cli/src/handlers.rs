//! Command handlers.

use console::style;
use darkroom_cache::BreakerState;
use darkroom_cli::{App, DarkroomConfig};
use darkroom_core::{CacheKey, ContentFingerprint, Error, ParamValue, StageKind, StageParams};
use darkroom_hash::ContentHasher;
use std::path::Path;

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Print the pixel fingerprint of an image file.
pub async fn fingerprint(config: &DarkroomConfig, path: &Path, json: bool) -> CliResult {
    let raw = tokio::fs::read(path).await?;
    let hasher = ContentHasher::new(config.hasher.clone());
    let outcome =
        tokio::task::spawn_blocking(move || hasher.fingerprint_with_outcome(&raw)).await??;

    if json {
        let value = serde_json::json!({
            "fingerprint": outcome.fingerprint.as_str(),
            "mode": outcome.mode,
            "width": outcome.width,
            "height": outcome.height,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{}", outcome.fingerprint);
    println!(
        "  {} {}x{} ({:?})",
        style("size").dim(),
        outcome.width,
        outcome.height,
        outcome.mode
    );
    Ok(())
}

pub async fn cache_health(config: DarkroomConfig) -> CliResult {
    let app = App::build(config).await?;

    println!(
        "{:<24} {:<20} {:<10} {:>8} {:>8}",
        "TIER", "KIND", "STATE", "FAILS", "TOTAL"
    );
    for health in app.cache().health() {
        let state = match health.state {
            BreakerState::Closed => style("closed").green(),
            BreakerState::Open => style("open").red(),
            BreakerState::HalfOpen => style("half-open").yellow(),
        };
        println!(
            "{:<24} {:<20} {:<10} {:>8} {:>8}",
            health.tier.as_str(),
            format!("{:?}", health.kind),
            state,
            health.consecutive_failures,
            health.total_failures
        );
        if let Some(ms) = health.retry_in_ms {
            println!("  {} retry in {}ms", style("↻").dim(), ms);
        }
    }
    Ok(())
}

pub async fn cache_delete(
    config: DarkroomConfig,
    stage: &str,
    fingerprint: &str,
    version: &str,
    params: &[String],
    upstream: Option<String>,
) -> CliResult {
    let kind: StageKind = stage.parse()?;
    let fingerprint: ContentFingerprint = fingerprint.parse()?;
    let params = parse_params(params)?;
    params.validate()?;

    let mut key = CacheKey::new(&kind, version, &fingerprint, &params);
    key.upstream = upstream;

    let app = App::build(config).await?;
    let report = app.cache().delete(&key).await;

    println!("Deleted {} ({})", style(&key).bold(), key.digest());
    for tier in &report.stored {
        println!("  {} {}", style("✓").green(), tier);
    }
    for tier in &report.failed {
        println!("  {} {} failed", style("✗").red(), tier);
    }
    for tier in &report.skipped {
        println!("  {} {} skipped (circuit open)", style("!").yellow(), tier);
    }
    Ok(())
}

pub async fn model_resolve(config: DarkroomConfig, model_id: &str) -> CliResult {
    let app = App::build(config).await?;
    match app.models().resolve(model_id).await {
        Ok(path) => {
            println!("{} {}", style("✓").green(), path.display());
            Ok(())
        }
        Err(Error::ModelUnavailable { model_id, attempts }) => {
            eprintln!("{} Model {} is unavailable", style("✗").red(), style(&model_id).bold());
            for attempt in &attempts {
                eprintln!("  - {}", attempt);
            }
            Err(Box::new(Error::ModelUnavailable { model_id, attempts }))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn model_list(config: &DarkroomConfig) -> CliResult {
    if config.models.models.is_empty() {
        println!("{} No models registered", style("i").blue());
        return Ok(());
    }
    for spec in &config.models.models {
        println!(
            "{:<20} {:<28} {:>12} bytes{}",
            spec.id,
            spec.file_name,
            spec.expected_size,
            if spec.sha256.is_some() { "  sha256" } else { "" }
        );
    }
    Ok(())
}

pub fn show_config(config: &DarkroomConfig) -> CliResult {
    print!("{}", config.to_yaml()?);
    Ok(())
}

fn parse_params(raw: &[String]) -> Result<StageParams, Error> {
    let mut params = StageParams::new();
    for pair in raw {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| Error::InvalidRequest(format!("expected KEY=VALUE, got {}", pair)))?;
        params.insert(key.trim(), ParamValue::parse_loose(value.trim()));
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_params() {
        let params = parse_params(&["contrast=1.12".into(), "grain=true".into()]).unwrap();
        assert_eq!(params.get("contrast"), Some(&ParamValue::Float(1.12)));
        assert_eq!(params.get("grain"), Some(&ParamValue::Bool(true)));
        assert!(parse_params(&["contrast".into()]).is_err());
    }
}
