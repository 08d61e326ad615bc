use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;

const DEFAULT_TICKS: u32 = 120;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliOptions {
    pub catalog: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub assets_root: PathBuf,
    pub spawn: Vec<String>,
    pub count: usize,
    pub ticks: u32,
    pub activate: Option<String>,
}

impl Default for CliOptions {
    fn default() -> Self {
        Self {
            catalog: None,
            config: None,
            assets_root: PathBuf::from("."),
            spawn: Vec::new(),
            count: 1,
            ticks: DEFAULT_TICKS,
            activate: None,
        }
    }
}

impl CliOptions {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = CliOptions::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            let Some(key) = flag.strip_prefix("--") else {
                bail!("Unexpected argument '{flag}'. Flags take the form --name value.");
            };
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "catalog" => options.catalog = Some(PathBuf::from(value)),
                "config" => options.config = Some(PathBuf::from(value)),
                "assets" => options.assets_root = PathBuf::from(value),
                "spawn" => {
                    options.spawn.extend(value.split(',').map(str::trim).filter(|k| !k.is_empty()).map(str::to_string));
                }
                "count" => {
                    options.count = value.parse::<usize>().with_context(|| format!("Invalid count '{value}'"))?;
                }
                "ticks" => {
                    options.ticks = value.parse::<u32>().with_context(|| format!("Invalid ticks '{value}'"))?;
                }
                "activate" => options.activate = Some(value),
                _ => bail!(
                    "Unknown flag '{flag}'. Supported flags: --catalog, --config, --assets, --spawn, --count, --ticks, --activate."
                ),
            }
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_spawn_list_and_counts() {
        let args = ["app", "--spawn", "CUBE, sign_with_chain", "--count", "3", "--ticks", "10"];
        let options = CliOptions::parse(args).expect("parse options");
        assert_eq!(options.spawn, vec!["CUBE".to_string(), "sign_with_chain".to_string()]);
        assert_eq!(options.count, 3);
        assert_eq!(options.ticks, 10);
        assert!(options.catalog.is_none());
    }

    #[test]
    fn repeated_spawn_flags_accumulate() {
        let options = CliOptions::parse(["app", "--spawn", "CUBE", "--spawn", "BALL"]).expect("parse options");
        assert_eq!(options.spawn.len(), 2);
    }

    #[test]
    fn missing_value_errors() {
        let err = CliOptions::parse(["app", "--count"]).unwrap_err();
        assert!(err.to_string().contains("Expected a value"), "error should mention missing value");
    }

    #[test]
    fn rejects_unknown_flags() {
        let err = CliOptions::parse(["app", "--width", "800"]).unwrap_err();
        assert!(err.to_string().contains("Unknown flag"), "unknown flags should error");
    }

    #[test]
    fn rejects_bad_numbers() {
        assert!(CliOptions::parse(["app", "--ticks", "many"]).is_err());
    }
}
