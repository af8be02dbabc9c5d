use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;

use crate::schemas::checking::{CheckingCriteria, QualityLevel};

pub(crate) const USAGE: &str = "usage: photo-checker --photo PATH --task TEXT [--task-type TYPE] \
[--criteria JSON] [--user ID] [--quality basic|standard|advanced|premium] [--no-cache]";

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CliArgs {
    pub(crate) photo: PathBuf,
    pub(crate) task: String,
    pub(crate) task_type: String,
    pub(crate) criteria: CheckingCriteria,
    pub(crate) user_id: String,
    pub(crate) quality: QualityLevel,
    pub(crate) no_cache: bool,
}

pub(crate) fn parse_args(args: impl IntoIterator<Item = String>) -> Result<CliArgs> {
    let mut photo = None;
    let mut task = None;
    let mut task_type = "general".to_string();
    let mut criteria = CheckingCriteria::default();
    let mut user_id = "anonymous".to_string();
    let mut quality = QualityLevel::Standard;
    let mut no_cache = false;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--photo" => {
                photo = Some(PathBuf::from(value(&mut args, "--photo")?));
            }
            "--task" => {
                task = Some(value(&mut args, "--task")?);
            }
            "--task-type" => {
                task_type = value(&mut args, "--task-type")?;
            }
            "--criteria" => {
                let raw = value(&mut args, "--criteria")?;
                let parsed: Value =
                    serde_json::from_str(&raw).context("--criteria must be valid JSON")?;
                if !parsed.is_object() {
                    return Err(anyhow!("--criteria must be a JSON object"));
                }
                criteria = CheckingCriteria::from(parsed);
            }
            "--user" => {
                user_id = value(&mut args, "--user")?;
            }
            "--quality" => {
                quality = value(&mut args, "--quality")?.parse().map_err(|err: String| anyhow!(err))?;
            }
            "--no-cache" => no_cache = true,
            _ => return Err(anyhow!("Unknown argument: {arg}\n{USAGE}")),
        }
    }

    Ok(CliArgs {
        photo: photo.ok_or_else(|| anyhow!("--photo is required\n{USAGE}"))?,
        task: task.ok_or_else(|| anyhow!("--task is required\n{USAGE}"))?,
        task_type,
        criteria,
        user_id,
        quality,
        no_cache,
    })
}

fn value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    args.next().ok_or_else(|| anyhow!("{flag} missing value"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn parses_full_argument_set() {
        let parsed = parse_args(args(&[
            "--photo",
            "work.jpg",
            "--task",
            "Solve x^2 = 4",
            "--task-type",
            "algebra",
            "--criteria",
            r#"{"keywords": ["roots"]}"#,
            "--user",
            "17",
            "--quality",
            "premium",
            "--no-cache",
        ]))
        .expect("args");

        assert_eq!(parsed.photo, PathBuf::from("work.jpg"));
        assert_eq!(parsed.task, "Solve x^2 = 4");
        assert_eq!(parsed.task_type, "algebra");
        assert_eq!(parsed.criteria.keywords(), vec!["roots".to_string()]);
        assert_eq!(parsed.user_id, "17");
        assert_eq!(parsed.quality, QualityLevel::Premium);
        assert!(parsed.no_cache);
    }

    #[test]
    fn applies_defaults() {
        let parsed = parse_args(args(&["--task", "t", "--photo", "p.png"])).expect("args");

        assert_eq!(parsed.quality, QualityLevel::Standard);
        assert_eq!(parsed.user_id, "anonymous");
        assert!(parsed.criteria.is_empty());
        assert!(!parsed.no_cache);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_args(args(&["--task", "t"])).is_err());
        assert!(parse_args(args(&["--photo", "p", "--task", "t", "--quality", "gold"])).is_err());
        assert!(parse_args(args(&["--photo", "p", "--task", "t", "--criteria", "[1]"])).is_err());
        assert!(parse_args(args(&["--photo"])).is_err());
        assert!(parse_args(args(&["--verbose"])).is_err());
    }
}
