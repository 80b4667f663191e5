// CLI commands for managing CodeVersus content
use anyhow::{bail, Context, Result};
use codeversus_common::store::{load_problem, ProblemStore};
use codeversus_common::types::{ComparisonPolicy, Language};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::generator::TemplateGenerator;

/// The subset of a languages.json entry the CLI reports on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageEntry {
    pub name: Language,
    pub version: String,
    pub image: String,
    #[serde(default)]
    pub compile: Option<Vec<String>>,
    pub run: Vec<String>,
    pub memory_limit_mb: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LanguagesJson {
    pub languages: Vec<LanguageEntry>,
}

/// Load languages configuration
fn load_languages_config(path: &Path) -> Result<LanguagesJson> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).context("Failed to parse languages.json")
}

/// List all configured languages
pub async fn list_languages(languages_path: &Path) -> Result<()> {
    let languages_json = load_languages_config(languages_path)?;

    if languages_json.languages.is_empty() {
        println!("No languages configured.");
        return Ok(());
    }

    println!("📋 Configured Languages:\n");
    println!(
        "{:<10} {:<10} {:<28} {:<10} {:<10}",
        "Name", "Version", "Image", "Compiled", "Memory"
    );
    println!("{}", "─".repeat(72));

    for lang in &languages_json.languages {
        println!(
            "{:<10} {:<10} {:<28} {:<10} {} MB",
            lang.name.to_string(),
            lang.version,
            lang.image,
            if lang.compile.is_some() { "yes" } else { "no" },
            lang.memory_limit_mb
        );
    }

    println!("\n✅ Total: {} language(s)", languages_json.languages.len());

    Ok(())
}

/// Validate every problem under the content directory
pub async fn check_content(problems_dir: &Path, languages_path: &Path) -> Result<()> {
    println!("🔍 Checking content in: {}", problems_dir.display());

    let languages_json = load_languages_config(languages_path)?;
    let enabled: BTreeSet<Language> = languages_json.languages.iter().map(|l| l.name).collect();

    let store = ProblemStore::load(problems_dir)
        .with_context(|| format!("Failed to load problems from {}", problems_dir.display()))?;

    if store.is_empty() {
        bail!("No problems found under {}", problems_dir.display());
    }

    println!(
        "\n{:<24} {:<28} {:<8} {:<26}",
        "Problem", "Languages", "Cases", "Comparison"
    );
    println!("{}", "─".repeat(88));

    let mut warnings = 0;
    for problem in store.iter() {
        let languages: Vec<String> = problem.languages().iter().map(|l| l.to_string()).collect();
        println!(
            "{:<24} {:<28} {:<8} {:<26}",
            problem.id,
            languages.join(","),
            problem.test_cases.len(),
            problem.comparison.to_string()
        );

        for language in problem.languages() {
            if !enabled.contains(&language) {
                println!("  ⚠️  {} has a {} template but {} is not in languages.json", problem.id, language, language);
                warnings += 1;
            }
        }
    }

    println!("\n✅ {} problem(s) valid, {} warning(s)", store.len(), warnings);
    Ok(())
}

/// Print the program a submission would compile to
pub async fn assemble(
    problems_dir: &Path,
    problem_id: &str,
    language: &str,
    code_path: &Path,
    output: Option<&Path>,
) -> Result<()> {
    let language: Language = language.parse()?;
    let problem = load_problem(&problems_dir.join(problem_id))
        .with_context(|| format!("Failed to load problem '{}'", problem_id))?;
    let code = fs::read_to_string(code_path)
        .with_context(|| format!("Failed to read {}", code_path.display()))?;

    let source = problem.template(language)?.assemble(&code)?;

    match output {
        Some(path) => {
            fs::write(path, &source).with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("✅ Wrote {} ({} bytes)", path.display(), source.len());
        }
        None => print!("{}", source),
    }
    Ok(())
}

/// Options for scaffolding a new problem
pub struct NewProblem<'a> {
    pub id: &'a str,
    pub languages: &'a [String],
    pub function: &'a str,
    pub time_limit_ms: u64,
    pub comparison: &'a str,
    pub sample_input: &'a str,
    pub sample_output: &'a str,
}

/// Scaffold a new problem directory with boilerplate for each language
pub async fn new_problem(problems_dir: &Path, options: NewProblem<'_>) -> Result<()> {
    println!("🚀 Creating problem: {}", options.id);

    if options.id.is_empty() || options.id.contains(['/', '\\']) || options.id.starts_with('.') {
        bail!("Invalid problem id '{}'", options.id);
    }
    let comparison: ComparisonPolicy = options.comparison.parse()?;
    let languages = options
        .languages
        .iter()
        .map(|l| l.parse::<Language>())
        .collect::<Result<BTreeSet<_>, _>>()?;
    if languages.is_empty() {
        bail!("At least one language is required");
    }

    let problem_path = problems_dir.join(options.id);
    if problem_path.exists() {
        bail!("Problem '{}' already exists at {}", options.id, problem_path.display());
    }

    let generator = TemplateGenerator::new()?;

    let boilerplate_dir = problem_path.join("boilerplate-full");
    let inputs_dir = problem_path.join("tests").join("inputs");
    let outputs_dir = problem_path.join("tests").join("outputs");
    for dir in [&boilerplate_dir, &inputs_dir, &outputs_dir] {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    for language in &languages {
        let template = generator.render_boilerplate(*language, options.function)?;
        let path = boilerplate_dir.join(format!("function.{}", language.extension()));
        fs::write(&path, template.source()).with_context(|| format!("Failed to write {}", path.display()))?;
        println!("  ✅ Created: {}", path.display());
    }

    fs::write(inputs_dir.join("0.txt"), options.sample_input)?;
    fs::write(outputs_dir.join("0.txt"), options.sample_output)?;
    println!("  ✅ Created: sample test case 0");

    let manifest = generator.render_manifest(options.time_limit_ms, &comparison.to_string())?;
    fs::write(problem_path.join("problem.json"), manifest)?;
    println!("  ✅ Created: problem.json");

    // The scaffold must load exactly as the judge will see it
    load_problem(&problem_path).context("Generated problem does not load")?;

    println!("\n📋 Next steps:");
    println!("  1. Write the harness around ##USER_CODE_HERE## in each boilerplate");
    println!("  2. Add test cases as tests/inputs/<n>.txt and tests/outputs/<n>.txt");
    println!("  3. Validate with: codeversus-cli check --problems {}", problems_dir.display());

    Ok(())
}
