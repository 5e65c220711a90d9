//! Command-line parsing.

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use std::path::PathBuf;
use tracekeep_core::EpochId;
use tracekeep_scoring::EpochExposure;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Open the keystore and reload it periodically until interrupted.
    Serve,
    /// Print the aliases resident in the cache as JSON.
    CacheStatus,
    /// Write a freshly generated sealed keystore.
    Provision {
        out: PathBuf,
        from: NaiveDate,
        days: u32,
    },
    /// Print the rules resolved for a venue.
    Resolve {
        venue_type: u32,
        category1: u32,
        category2: u32,
    },
    /// Print the aggregated proximity risk of one user.
    Proximity {
        latest_risk_epoch: Option<EpochId>,
        exposures: Vec<EpochExposure>,
    },
    VersionJson,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cli {
    pub config: Option<PathBuf>,
    pub command: Command,
}

pub const USAGE: &str = "usage: tracekeep-node [--config <path>] <serve | cache-status | \
provision --out <file> --from <yyyy-mm-dd> --days <n> | resolve <type> <cat1> <cat2> | \
proximity [--after <epoch>] <epoch>:<score>[,<score>...]...> | tracekeep-node --version-json";

/// Parse arguments, program name excluded.
pub fn parse_args(args: &[String]) -> Result<Cli> {
    if args.iter().any(|arg| arg == "--version-json") {
        return Ok(Cli {
            config: None,
            command: Command::VersionJson,
        });
    }

    let mut config = None;
    let mut positional = Vec::new();
    let mut options = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter
                    .next()
                    .ok_or_else(|| anyhow!("--config was provided without a path"))?;
                config = Some(PathBuf::from(path));
            }
            flag if flag.starts_with("--") => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("{} was provided without a value", flag))?;
                options.push((flag, value.as_str()));
            }
            _ => positional.push(arg.as_str()),
        }
    }

    let optional = |name: &str| {
        options
            .iter()
            .find(|(flag, _)| *flag == name)
            .map(|(_, value)| *value)
    };
    let option =
        |name: &str| optional(name).ok_or_else(|| anyhow!("missing required {} argument", name));

    let command = match positional.as_slice() {
        ["serve"] => Command::Serve,
        ["cache-status"] => Command::CacheStatus,
        ["provision"] => Command::Provision {
            out: PathBuf::from(option("--out")?),
            from: option("--from")?
                .parse()
                .context("--from must be a yyyy-mm-dd date")?,
            days: option("--days")?
                .parse()
                .context("--days must be a non-negative integer")?,
        },
        ["resolve", venue_type, category1, category2] => Command::Resolve {
            venue_type: venue_type.parse().context("invalid venue type")?,
            category1: category1.parse().context("invalid venue category1")?,
            category2: category2.parse().context("invalid venue category2")?,
        },
        ["proximity", exposures @ ..] => Command::Proximity {
            latest_risk_epoch: optional("--after")
                .map(|epoch| epoch.parse::<EpochId>().context("--after must be an epoch id"))
                .transpose()?,
            exposures: exposures
                .iter()
                .map(|raw| parse_exposure(raw))
                .collect::<Result<_>>()?,
        },
        [] => bail!("missing command\n{}", USAGE),
        other => bail!("unknown command {:?}\n{}", other, USAGE),
    };

    if config.is_none() && !matches!(command, Command::Provision { .. }) {
        bail!("missing required --config <path> argument");
    }

    Ok(Cli { config, command })
}

/// Parse `<epoch>:<score>[,<score>...]`.
fn parse_exposure(raw: &str) -> Result<EpochExposure> {
    let (epoch, scores) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("exposure {:?} is not <epoch>:<scores>", raw))?;
    let epoch_id: EpochId = epoch
        .parse()
        .with_context(|| format!("invalid epoch in {:?}", raw))?;
    let scores: Vec<f64> = scores
        .split(',')
        .map(|score| {
            score
                .trim()
                .parse::<f64>()
                .with_context(|| format!("invalid score in {:?}", raw))
        })
        .collect::<Result<_>>()?;
    Ok(EpochExposure::new(epoch_id, scores))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_version_json_needs_no_config() {
        assert_eq!(
            parse_args(&args(&["--version-json"])).unwrap().command,
            Command::VersionJson
        );
    }

    #[test]
    fn test_version_json_ignores_other_arguments() {
        let cli = parse_args(&args(&["--config", "node.toml", "serve", "--version-json"])).unwrap();
        assert_eq!(cli.config, None);
        assert_eq!(cli.command, Command::VersionJson);
    }

    #[test]
    fn test_serve_requires_config() {
        assert!(parse_args(&args(&["serve"])).is_err());
        let cli = parse_args(&args(&["--config", "node.toml", "serve"])).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("node.toml")));
        assert_eq!(cli.command, Command::Serve);
    }

    #[test]
    fn test_provision_options() {
        let cli = parse_args(&args(&[
            "provision",
            "--out",
            "keystore.json",
            "--from",
            "2020-06-01",
            "--days",
            "30",
        ]))
        .unwrap();
        assert_eq!(
            cli.command,
            Command::Provision {
                out: PathBuf::from("keystore.json"),
                from: NaiveDate::from_ymd_opt(2020, 6, 1).unwrap(),
                days: 30,
            }
        );
        assert!(parse_args(&args(&["provision", "--out", "k.json", "--days", "3"])).is_err());
    }

    #[test]
    fn test_resolve_arguments() {
        let cli = parse_args(&args(&["--config", "n.toml", "resolve", "3", "1", "2"])).unwrap();
        assert_eq!(
            cli.command,
            Command::Resolve {
                venue_type: 3,
                category1: 1,
                category2: 2
            }
        );
        assert!(parse_args(&args(&["--config", "n.toml", "resolve", "3", "x", "2"])).is_err());
        assert!(parse_args(&args(&["--config", "n.toml", "launch"])).is_err());
    }

    #[test]
    fn test_proximity_arguments() {
        let cli = parse_args(&args(&[
            "--config",
            "n.toml",
            "proximity",
            "--after",
            "120",
            "130:4.5,2",
            "140:1",
        ]))
        .unwrap();
        assert_eq!(
            cli.command,
            Command::Proximity {
                latest_risk_epoch: Some(120),
                exposures: vec![
                    EpochExposure::new(130, vec![4.5, 2.0]),
                    EpochExposure::new(140, vec![1.0]),
                ],
            }
        );

        let cli = parse_args(&args(&["--config", "n.toml", "proximity", "7:1"])).unwrap();
        assert!(matches!(
            cli.command,
            Command::Proximity {
                latest_risk_epoch: None,
                ..
            }
        ));
        assert!(parse_args(&args(&["--config", "n.toml", "proximity", "7"])).is_err());
        assert!(parse_args(&args(&["--config", "n.toml", "proximity", "7:x"])).is_err());
    }
}
