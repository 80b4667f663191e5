// Boilerplate generation for new problems
// Renders per-language scaffolds and problem.json with Handlebars

use anyhow::{Context, Result};
use codeversus_common::template::Template;
use codeversus_common::types::Language;
use handlebars::Handlebars;
use serde::Serialize;

const CPP_TEMPLATE: &str = r#"#include <iostream>
#include <vector>

##USER_CODE_HERE##

int main() {
    std::vector<int> values;
    int value;
    while (std::cin >> value) {
        values.push_back(value);
    }
    std::cout << {{function}}(values) << std::endl;
    return 0;
}
"#;

const JAVA_TEMPLATE: &str = r#"import java.util.*;

public class Main {

    ##USER_CODE_HERE##

    public static void main(String[] args) {
        Scanner scanner = new Scanner(System.in);
        List<Integer> values = new ArrayList<>();
        while (scanner.hasNextInt()) {
            values.add(scanner.nextInt());
        }
        System.out.println({{function}}(values));
    }
}
"#;

const PYTHON_TEMPLATE: &str = r#"import sys

##USER_CODE_HERE##

if __name__ == "__main__":
    values = [int(token) for token in sys.stdin.read().split()]
    print({{function}}(values))
"#;

const RUST_TEMPLATE: &str = r#"use std::io::Read;

##USER_CODE_HERE##

fn main() {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input).unwrap();
    let values: Vec<i64> = input
        .split_whitespace()
        .map(|token| token.parse().unwrap())
        .collect();
    println!("{}", {{function}}(&values));
}
"#;

const BASH_TEMPLATE: &str = r#"#!/usr/bin/env bash

##USER_CODE_HERE##

read -r -a values
{{function}} "${values[@]}"
"#;

const JAVASCRIPT_TEMPLATE: &str = r#"const fs = require("fs");

##USER_CODE_HERE##

const values = fs
  .readFileSync(0, "utf8")
  .split(/\s+/)
  .filter((token) => token.length > 0)
  .map(Number);
console.log({{function}}(values));
"#;

const MANIFEST_TEMPLATE: &str = r#"{
  "limits": {
    "time_limit_ms": {{time_limit_ms}}
  },
  "comparison": "{{comparison}}"
}
"#;

#[derive(Serialize)]
struct BoilerplateData<'a> {
    function: &'a str,
}

#[derive(Serialize)]
struct ManifestData<'a> {
    time_limit_ms: u64,
    comparison: &'a str,
}

pub struct TemplateGenerator {
    handlebars: Handlebars<'static>,
}

impl TemplateGenerator {
    pub fn new() -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        // Sources are code, not HTML
        handlebars.register_escape_fn(handlebars::no_escape);

        for language in Language::ALL {
            handlebars
                .register_template_string(&language.to_string(), boilerplate_source(language))
                .with_context(|| format!("Invalid {} boilerplate template", language))?;
        }
        handlebars
            .register_template_string("manifest", MANIFEST_TEMPLATE)
            .context("Invalid problem.json template")?;

        Ok(Self { handlebars })
    }

    /// Render the scaffold for one language, checked to contain exactly one
    /// user-code marker
    pub fn render_boilerplate(&self, language: Language, function: &str) -> Result<Template> {
        let source = self
            .handlebars
            .render(&language.to_string(), &BoilerplateData { function })
            .with_context(|| format!("Failed to render {} boilerplate", language))?;
        Ok(Template::new(language, source)?)
    }

    pub fn render_manifest(&self, time_limit_ms: u64, comparison: &str) -> Result<String> {
        self.handlebars
            .render(
                "manifest",
                &ManifestData {
                    time_limit_ms,
                    comparison,
                },
            )
            .context("Failed to render problem.json")
    }
}

fn boilerplate_source(language: Language) -> &'static str {
    match language {
        Language::Cpp => CPP_TEMPLATE,
        Language::Java => JAVA_TEMPLATE,
        Language::Python => PYTHON_TEMPLATE,
        Language::Rust => RUST_TEMPLATE,
        Language::Bash => BASH_TEMPLATE,
        Language::JavaScript => JAVASCRIPT_TEMPLATE,
    }
}
