//! CLI entry point: loads a playbook, drives the scheduler, and reports the
//! outcome via process exit code.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use dataflow_playbook::cli::{self, Cli, Command};
use dataflow_playbook::config::ConfigLoader;
use dataflow_playbook::invoker::SubprocessModuleRunner;
use dataflow_playbook::playbook::{self, Task};
use dataflow_playbook::scheduler::Scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loader = match &cli.config {
        Some(path) => {
            let dir = path.parent().map(|p| p.to_path_buf());
            ConfigLoader::load_with_paths(dataflow_playbook::config::ConfigPaths::with_dir(dir))
        }
        None => ConfigLoader::load(),
    };
    let config = loader?.into_config();

    let level = match cli.verbose {
        0 => config.log_level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    dataflow_playbook::logging::init(&level);

    let exit_code = match &cli.command {
        Command::Run { playbook, extra_vars, check } => {
            run_playbook(playbook, extra_vars, *check, &config).await
        }
        Command::SyntaxCheck { playbook } => syntax_check(playbook),
        Command::ListTasks { playbook } => list_tasks(playbook),
    };

    std::process::exit(exit_code);
}

async fn run_playbook(
    path: &std::path::Path,
    extra_vars: &[String],
    check: bool,
    config: &dataflow_playbook::config::RunnerConfig,
) -> i32 {
    let playbooks = match playbook::load_document(path) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{e}");
            return 1;
        }
    };

    let vars = match cli::parse_extra_vars(extra_vars) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("{e}");
            return 1;
        }
    };

    let runner = SubprocessModuleRunner::new(config.module_runner.clone(), config.temp_dir.clone());
    let scheduler = Scheduler::new(Arc::new(runner), config.host.clone(), check);

    let summary = scheduler.run(playbooks, vars).await;

    println!("ran={} skipped={} failed={}", summary.ran, summary.skipped, summary.failed);

    if let Some(err) = &summary.fatal {
        eprintln!("{err}");
    }
    summary.exit_code()
}

fn syntax_check(path: &std::path::Path) -> i32 {
    match playbook::load_document(path) {
        Ok(playbooks) => {
            let task_count: usize = playbooks.iter().map(|p| p.tasks.len()).sum();
            println!("syntax ok: {} playbook(s), {} top-level task(s)", playbooks.len(), task_count);
            0
        }
        Err(e) => {
            eprintln!("{e}");
            1
        }
    }
}

fn list_tasks(path: &std::path::Path) -> i32 {
    match playbook::load_document(path) {
        Ok(playbooks) => {
            for (i, pb) in playbooks.iter().enumerate() {
                println!("playbook {i}:");
                for task in &pb.tasks {
                    print_task(task, 1);
                }
            }
            0
        }
        Err(e) => {
            eprintln!("{e}");
            1
        }
    }
}

fn print_task(task: &Task, depth: usize) {
    let indent = "  ".repeat(depth);
    println!("{indent}- {} [{}]", task.display_name(), task.module);
    if let Some(children) = &task.block {
        for child in children {
            print_task(child, depth + 1);
        }
    }
}
