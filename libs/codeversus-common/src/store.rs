/// Template Store - problem content loaded from disk
///
/// Layout of the content directory:
///
/// ```text
/// problems/<problem-id>/
///   boilerplate-full/function.<ext>   one scaffold per language
///   tests/inputs/<n>.txt              n = 0, 1, 2, ...
///   tests/outputs/<n>.txt
///   problem.json                      optional limits and comparison policy
/// ```
///
/// Every template is validated while loading, so a malformed scaffold fails
/// at startup instead of on the first submission that uses it.
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{JudgeError, Result};
use crate::template::Template;
use crate::types::{ComparisonPolicy, Language, LimitOverrides, Problem, TestCase};

const BOILERPLATE_DIR: &str = "boilerplate-full";
const BOILERPLATE_STEM: &str = "function";
const MANIFEST_FILE: &str = "problem.json";

/// Optional per-problem settings
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProblemManifest {
    #[serde(default)]
    limits: LimitOverrides,
    #[serde(default)]
    comparison: Option<String>,
    /// Per-case overrides keyed by test case index
    #[serde(default)]
    case_limits: BTreeMap<usize, LimitOverrides>,
}

/// Immutable set of published problems keyed by id
#[derive(Debug, Default, Clone)]
pub struct ProblemStore {
    problems: BTreeMap<String, Arc<Problem>>,
}

impl ProblemStore {
    /// Load every problem directory under `root`
    pub fn load(root: &Path) -> Result<Self> {
        let entries = fs::read_dir(root).map_err(|e| content_error(root, e))?;

        let mut problems = BTreeMap::new();
        for entry in entries {
            let entry = entry.map_err(|e| content_error(root, e))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let problem = load_problem(&path)?;
            debug!(
                problem_id = %problem.id,
                languages = ?problem.languages(),
                test_cases = problem.test_cases.len(),
                "Loaded problem"
            );
            problems.insert(problem.id.clone(), Arc::new(problem));
        }

        Ok(Self { problems })
    }

    pub fn from_problems(problems: impl IntoIterator<Item = Problem>) -> Self {
        Self {
            problems: problems
                .into_iter()
                .map(|p| (p.id.clone(), Arc::new(p)))
                .collect(),
        }
    }

    pub fn get(&self, id: &str) -> Result<Arc<Problem>> {
        self.problems
            .get(id)
            .cloned()
            .ok_or_else(|| JudgeError::UnknownProblem(id.to_string()))
    }

    pub fn ids(&self) -> Vec<String> {
        self.problems.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Problem>> {
        self.problems.values()
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Load a single problem directory. The directory name is the problem id.
pub fn load_problem(dir: &Path) -> Result<Problem> {
    let id = dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| JudgeError::ContentLoad {
            path: dir.display().to_string(),
            reason: "problem directory name is not valid UTF-8".to_string(),
        })?
        .to_string();

    let manifest = load_manifest(dir)?;
    let templates = load_templates(dir)?;
    if templates.is_empty() {
        return Err(JudgeError::ContentLoad {
            path: dir.display().to_string(),
            reason: format!("no {}/{}.<ext> templates", BOILERPLATE_DIR, BOILERPLATE_STEM),
        });
    }

    let mut test_cases = load_test_cases(dir)?;
    if test_cases.is_empty() {
        return Err(JudgeError::ContentLoad {
            path: dir.display().to_string(),
            reason: "no test cases under tests/inputs".to_string(),
        });
    }
    for (index, limits) in &manifest.case_limits {
        match test_cases.get_mut(*index) {
            Some(case) => case.limits = *limits,
            None => warn!(problem_id = %id, index, "case_limits entry has no matching test case"),
        }
    }

    let comparison = match manifest.comparison {
        Some(name) => name.parse::<ComparisonPolicy>()?,
        None => ComparisonPolicy::default(),
    };

    Ok(Problem {
        id,
        templates,
        test_cases,
        limits: manifest.limits,
        comparison,
    })
}

fn load_manifest(dir: &Path) -> Result<ProblemManifest> {
    let path = dir.join(MANIFEST_FILE);
    if !path.exists() {
        return Ok(ProblemManifest::default());
    }
    let content = fs::read_to_string(&path).map_err(|e| content_error(&path, e))?;
    serde_json::from_str(&content).map_err(|e| content_error(&path, e))
}

fn load_templates(dir: &Path) -> Result<Vec<Template>> {
    let boilerplate = dir.join(BOILERPLATE_DIR);
    if !boilerplate.is_dir() {
        return Ok(Vec::new());
    }

    let mut templates = Vec::new();
    for entry in fs::read_dir(&boilerplate).map_err(|e| content_error(&boilerplate, e))? {
        let path = entry.map_err(|e| content_error(&boilerplate, e))?.path();
        if path.file_stem().and_then(|s| s.to_str()) != Some(BOILERPLATE_STEM) {
            continue;
        }
        let Some(language) = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Language::from_extension)
        else {
            warn!(path = %path.display(), "Skipping boilerplate with unknown extension");
            continue;
        };

        let source = fs::read_to_string(&path).map_err(|e| content_error(&path, e))?;
        templates.push(Template::new(language, source)?);
    }

    templates.sort_by_key(|t| t.language());
    Ok(templates)
}

/// Read `tests/inputs/<n>.txt` / `tests/outputs/<n>.txt` pairs from n = 0
/// until the first missing input.
fn load_test_cases(dir: &Path) -> Result<Vec<TestCase>> {
    let inputs = dir.join("tests").join("inputs");
    let outputs = dir.join("tests").join("outputs");

    let mut cases = Vec::new();
    for index in 0.. {
        let input_path = inputs.join(format!("{}.txt", index));
        if !input_path.exists() {
            break;
        }
        let output_path = outputs.join(format!("{}.txt", index));
        let input = fs::read_to_string(&input_path).map_err(|e| content_error(&input_path, e))?;
        let expected = fs::read_to_string(&output_path).map_err(|e| content_error(&output_path, e))?;
        cases.push(TestCase::new(input, expected));
    }

    Ok(cases)
}

fn content_error(path: &Path, err: impl std::fmt::Display) -> JudgeError {
    JudgeError::ContentLoad {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CPP: &str = "#include <iostream>\n##USER_CODE_HERE##\nint main() { return 0; }\n";

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn find_maximum(root: &Path) {
        write(root, "find-maximum/boilerplate-full/function.cpp", CPP);
        write(root, "find-maximum/boilerplate-full/function.java", "class Main { ##USER_CODE_HERE## }");
        write(root, "find-maximum/tests/inputs/0.txt", "1 5 3");
        write(root, "find-maximum/tests/outputs/0.txt", "5");
        write(root, "find-maximum/tests/inputs/1.txt", "-1 -2");
        write(root, "find-maximum/tests/outputs/1.txt", "-1");
    }

    #[test]
    fn test_load_problem_directory() {
        let dir = TempDir::new().unwrap();
        find_maximum(dir.path());

        let store = ProblemStore::load(dir.path()).unwrap();
        assert_eq!(store.ids(), vec!["find-maximum".to_string()]);

        let problem = store.get("find-maximum").unwrap();
        assert_eq!(problem.languages(), vec![Language::Cpp, Language::Java]);
        assert_eq!(problem.test_cases.len(), 2);
        assert_eq!(problem.test_cases[0].input, "1 5 3");
        assert_eq!(problem.test_cases[1].expected_output, "-1");
        assert_eq!(problem.comparison, ComparisonPolicy::TrimTrailingWhitespace);
    }

    #[test]
    fn test_manifest_overrides() {
        let dir = TempDir::new().unwrap();
        find_maximum(dir.path());
        write(
            dir.path(),
            "find-maximum/problem.json",
            r#"{"limits": {"time_limit_ms": 1000}, "comparison": "token-sequence", "case_limits": {"1": {"memory_limit_mb": 32}}}"#,
        );

        let problem = load_problem(&dir.path().join("find-maximum")).unwrap();
        assert_eq!(problem.limits.time_limit_ms, Some(1000));
        assert_eq!(problem.comparison, ComparisonPolicy::TokenSequence);
        assert_eq!(problem.test_cases[0].limits, LimitOverrides::default());
        assert_eq!(problem.test_cases[1].limits.memory_limit_mb, Some(32));
    }

    #[test]
    fn test_malformed_template_fails_at_load() {
        let dir = TempDir::new().unwrap();
        find_maximum(dir.path());
        write(dir.path(), "find-maximum/boilerplate-full/function.py", "print(input())\n");

        let err = ProblemStore::load(dir.path()).unwrap_err();
        assert_eq!(
            err,
            JudgeError::TemplateMalformed {
                language: "python".to_string(),
                found: 0
            }
        );
    }

    #[test]
    fn test_unknown_policy_in_manifest() {
        let dir = TempDir::new().unwrap();
        find_maximum(dir.path());
        write(dir.path(), "find-maximum/problem.json", r#"{"comparison": "fuzzy"}"#);

        let err = load_problem(&dir.path().join("find-maximum")).unwrap_err();
        assert_eq!(err, JudgeError::ComparisonPolicyUnknown("fuzzy".to_string()));
    }

    #[test]
    fn test_missing_expected_output_is_error() {
        let dir = TempDir::new().unwrap();
        find_maximum(dir.path());
        write(dir.path(), "find-maximum/tests/inputs/2.txt", "7");

        let err = load_problem(&dir.path().join("find-maximum")).unwrap_err();
        assert!(matches!(err, JudgeError::ContentLoad { .. }));
    }

    #[test]
    fn test_problem_without_templates_rejected() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "empty/tests/inputs/0.txt", "1");
        write(dir.path(), "empty/tests/outputs/0.txt", "1");

        assert!(matches!(
            load_problem(&dir.path().join("empty")),
            Err(JudgeError::ContentLoad { .. })
        ));
    }

    #[test]
    fn test_unknown_problem_lookup() {
        let store = ProblemStore::default();
        assert_eq!(
            store.get("nope").unwrap_err(),
            JudgeError::UnknownProblem("nope".to_string())
        );
    }
}
