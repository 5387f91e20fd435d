//! Per-row output layout
//!
//! ```text
//! <output_root>/<row id>/
//!     vulnerable_code.txt   raw code from the dataset
//!     input.txt             full conversation trace
//!     output.txt            final completion, or `ERROR: <message>`
//!     input1.txt ...        per-stage conversation (multi-stage methods)
//!     output1.txt ...       per-stage completion
//! ```

use super::driver::RowError;
use crate::methods::{SampleResult, StageResult};
use crate::model::Message;
use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

static UNSAFE_PATH_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("valid path regex"));

/// Replace runs of filename-unfriendly characters with `-`
pub fn sanitize_for_path(text: &str) -> String {
    UNSAFE_PATH_CHARS
        .replace_all(text, "-")
        .trim_matches('-')
        .to_string()
}

/// Directory under which per-row folders are created.
///
/// An existing directory or a suffix-less path is used as is; a file-like path
/// becomes a directory with the same stem. Without an explicit path a
/// directory named after the dataset, method, model and `now` is created next
/// to the dataset.
pub fn resolve_output_root(
    dataset_path: &Path,
    output: Option<&Path>,
    model_name: &str,
    method: &str,
    now: DateTime<Local>,
) -> Result<PathBuf, RowError> {
    let root = match output {
        Some(path) if path.is_dir() || path.extension().is_none() => path.to_path_buf(),
        Some(path) => path.with_extension(""),
        None => {
            let stem = dataset_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let name = format!(
                "{}-{}-{}-{}",
                stem,
                method,
                sanitize_for_path(model_name),
                now.format("%Y%m%d-%H%M%S")
            );
            dataset_path
                .parent()
                .unwrap_or_else(|| Path::new(""))
                .join(name)
        }
    };

    create_dir(&root)?;
    Ok(root)
}

/// Render a conversation as `[ROLE]\ncontent` blocks separated by blank lines
pub fn format_messages(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("[{}]\n{}", m.role.as_str().to_uppercase(), m.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Write the artifacts of a successful row
pub fn write_sample(dir: &Path, raw_code: &str, result: &SampleResult) -> Result<(), RowError> {
    create_dir(dir)?;
    write_file(&dir.join("vulnerable_code.txt"), raw_code)?;
    write_file(&dir.join("input.txt"), &format_messages(&result.messages))?;
    write_file(&dir.join("output.txt"), &result.completion)?;

    if result.stages.len() > 1 {
        write_stages(dir, &result.stages)?;
    }
    Ok(())
}

/// Write the artifacts of a failed row
pub fn write_error(
    dir: &Path,
    raw_code: &str,
    system_template: &str,
    user_prompt: &str,
    partial: &[StageResult],
    error: &str,
) -> Result<(), RowError> {
    create_dir(dir)?;
    write_file(&dir.join("vulnerable_code.txt"), raw_code)?;
    write_file(
        &dir.join("input.txt"),
        &format!("[SYSTEM]\n{}\n\n[USER]\n{}", system_template, user_prompt),
    )?;
    write_stages(dir, partial)?;
    write_file(&dir.join("output.txt"), &format!("ERROR: {}", error))
}

fn write_stages(dir: &Path, stages: &[StageResult]) -> Result<(), RowError> {
    for (i, stage) in stages.iter().enumerate() {
        let n = i + 1;
        write_file(&dir.join(format!("input{}.txt", n)), &format_messages(&stage.messages))?;
        write_file(&dir.join(format!("output{}.txt", n)), &stage.completion)?;
    }
    Ok(())
}

fn create_dir(path: &Path) -> Result<(), RowError> {
    fs::create_dir_all(path).map_err(|source| RowError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn write_file(path: &Path, content: &str) -> Result<(), RowError> {
    fs::write(path, content).map_err(|source| RowError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    fn sample(stages: usize) -> SampleResult {
        let stage = |n: usize| StageResult {
            stage: n,
            messages: vec![Message::system(format!("s{}", n)), Message::user(format!("u{}", n))],
            completion: format!("c{}", n),
        };
        SampleResult {
            messages: vec![Message::system("s1"), Message::user("u1")],
            completion: format!("c{}", stages),
            stages: (1..=stages).map(stage).collect(),
        }
    }

    #[test]
    fn test_sanitize_for_path() {
        assert_eq!(sanitize_for_path("google/gemma-3-27b-it"), "google-gemma-3-27b-it");
        assert_eq!(sanitize_for_path("  a b//c  "), "a-b-c");
        assert_eq!(sanitize_for_path("row_1.v2"), "row_1.v2");
        assert_eq!(sanitize_for_path("///"), "");
    }

    #[test]
    fn test_default_output_root_next_to_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = dir.path().join("train.csv");
        let root = resolve_output_root(&dataset, None, "Qwen/Qwen3-32B", "3_planning", fixed_now()).unwrap();

        assert_eq!(
            root,
            dir.path().join("train-3_planning-Qwen-Qwen3-32B-20240309-140507")
        );
        assert!(root.is_dir());
    }

    #[test]
    fn test_explicit_output_paths() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = dir.path().join("train.csv");

        let plain = dir.path().join("results");
        let root = resolve_output_root(&dataset, Some(&plain), "m", "p", fixed_now()).unwrap();
        assert_eq!(root, plain);
        assert!(root.is_dir());

        let file_like = dir.path().join("out").join("run.csv");
        let root = resolve_output_root(&dataset, Some(&file_like), "m", "p", fixed_now()).unwrap();
        assert_eq!(root, dir.path().join("out").join("run"));
        assert!(root.is_dir());
    }

    #[test]
    fn test_format_messages() {
        let text = format_messages(&[Message::system("rules"), Message::user("code"), Message::assistant("plan")]);
        assert_eq!(text, "[SYSTEM]\nrules\n\n[USER]\ncode\n\n[ASSISTANT]\nplan");
    }

    #[test]
    fn test_single_stage_writes_no_stage_files() {
        let dir = tempfile::tempdir().unwrap();
        let row_dir = dir.path().join("row-000000");
        write_sample(&row_dir, "gets(buf);", &sample(1)).unwrap();

        assert_eq!(fs::read_to_string(row_dir.join("vulnerable_code.txt")).unwrap(), "gets(buf);");
        assert_eq!(fs::read_to_string(row_dir.join("input.txt")).unwrap(), "[SYSTEM]\ns1\n\n[USER]\nu1");
        assert_eq!(fs::read_to_string(row_dir.join("output.txt")).unwrap(), "c1");
        assert!(!row_dir.join("input1.txt").exists());
    }

    #[test]
    fn test_multi_stage_files_are_one_indexed() {
        let dir = tempfile::tempdir().unwrap();
        write_sample(dir.path(), "", &sample(2)).unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("output1.txt")).unwrap(), "c1");
        assert_eq!(fs::read_to_string(dir.path().join("output2.txt")).unwrap(), "c2");
        assert_eq!(
            fs::read_to_string(dir.path().join("input2.txt")).unwrap(),
            "[SYSTEM]\ns2\n\n[USER]\nu2"
        );
        assert!(!dir.path().join("input0.txt").exists());
    }

    #[test]
    fn test_error_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let partial = sample(1).stages;
        write_error(dir.path(), "code", "SYS", "USER PROMPT", &partial, "Stage 2 generation failed").unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join("output.txt")).unwrap(),
            "ERROR: Stage 2 generation failed"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("input.txt")).unwrap(),
            "[SYSTEM]\nSYS\n\n[USER]\nUSER PROMPT"
        );
        assert_eq!(fs::read_to_string(dir.path().join("output1.txt")).unwrap(), "c1");
    }
}
