//! CleanSlate CLI
//!
//! CLI tool for compiling cosmetic filter lists and inspecting selectors.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Instant;

use clap::{Parser, Subcommand};

use cs_compiler::{parse_filter_list, Compiler, RuleKind};

#[derive(Parser)]
#[command(name = "cs-cli")]
#[command(about = "CleanSlate cosmetic filter compiler and tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile filter lists into a JSON descriptor dump
    Compile {
        /// Input filter list files
        #[arg(short, long, required = true)]
        input: Vec<String>,

        /// Output JSON file
        #[arg(short, long, default_value = "descriptors.json")]
        output: String,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Compile a single selector and print its canonical form
    Canonize {
        /// Raw selector text
        selector: String,
    },

    /// Report which lines of a filter list fail to compile
    Check {
        /// Filter list file to check
        #[arg(short, long)]
        input: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Compile {
            input,
            output,
            verbose,
        } => cmd_compile(&input, &output, verbose),
        Commands::Canonize { selector } => cmd_canonize(&selector),
        Commands::Check { input } => cmd_check(&input),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn cmd_compile(inputs: &[String], output: &str, verbose: bool) -> Result<(), String> {
    if inputs.is_empty() {
        return Err("No input files specified".to_string());
    }

    let start = Instant::now();
    let mut compiler = Compiler::new();
    let mut all_rules = Vec::new();
    let mut total_lines = 0usize;

    for (list_id, path) in inputs.iter().enumerate() {
        let content =
            fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;

        let line_count = content.lines().count();
        total_lines += line_count;

        let rules = parse_filter_list(&content, &mut compiler);

        if verbose {
            println!(
                "  [{}] {} - {} lines, {} rules",
                list_id,
                Path::new(path).file_name().unwrap_or_default().to_string_lossy(),
                line_count,
                rules.len()
            );
        }

        all_rules.extend(rules);
    }

    let parse_time = start.elapsed();

    let mut hide = 0usize;
    let mut procedural = 0usize;
    let mut exceptions = 0usize;
    let mut other = 0usize;
    let mut descriptors = Vec::new();
    for rule in &all_rules {
        match &rule.kind {
            RuleKind::Hide(desc) => {
                hide += 1;
                if !desc.is_plain_css() {
                    procedural += 1;
                }
                descriptors.push(desc);
            }
            RuleKind::Exception(_) => exceptions += 1,
            RuleKind::Scriptlet(_) | RuleKind::Html(_) => other += 1,
        }
    }

    let json = serde_json::to_string_pretty(&descriptors)
        .map_err(|e| format!("Failed to serialize descriptors: {}", e))?;
    let mut file =
        fs::File::create(output).map_err(|e| format!("Failed to create '{}': {}", output, e))?;
    file.write_all(json.as_bytes())
        .map_err(|e| format!("Failed to write '{}': {}", output, e))?;

    let total_time = start.elapsed();

    println!("Compiled {} filter lists to '{}'", inputs.len(), output);
    println!("  Lines:       {}", total_lines);
    println!(
        "  Hide rules:  {} ({} procedural), {} exceptions, {} other",
        hide, procedural, exceptions, other
    );
    println!(
        "  Size:        {} bytes ({:.1} KB)",
        json.len(),
        json.len() as f64 / 1024.0
    );
    println!(
        "  Time:        {:.1}ms (parse: {:.1}ms)",
        total_time.as_secs_f64() * 1000.0,
        parse_time.as_secs_f64() * 1000.0,
    );

    Ok(())
}

fn cmd_canonize(selector: &str) -> Result<(), String> {
    let mut compiler = Compiler::new();
    let desc = compiler
        .compile(selector)
        .ok_or_else(|| format!("selector does not compile: {selector}"))?;

    println!("{}", desc.decompile());
    if desc.is_plain_css() {
        println!("  kind:   plain CSS (stylesheet)");
    } else {
        println!("  kind:   procedural ({} tasks)", desc.tasks.len());
    }
    let json = serde_json::to_string_pretty(&desc)
        .map_err(|e| format!("Failed to serialize descriptor: {}", e))?;
    println!("{json}");

    Ok(())
}

fn cmd_check(input: &str) -> Result<(), String> {
    let content =
        fs::read_to_string(input).map_err(|e| format!("Failed to read '{}': {}", input, e))?;

    let mut compiler = Compiler::new();
    let mut checked = 0usize;
    let mut failed = 0usize;

    for (idx, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('!') || line.starts_with('[') {
            continue;
        }
        // Only cosmetic lines are ours to judge.
        if !line.contains("##") && !line.contains("#@#") && !line.contains("#?#") {
            continue;
        }
        checked += 1;
        if cs_compiler::parse_rule_line(line, &mut compiler).is_none() {
            failed += 1;
            println!("  line {}: {}", idx + 1, line);
        }
    }

    println!(
        "Checked {} cosmetic lines in '{}': {} failed",
        checked, input, failed
    );
    Ok(())
}
