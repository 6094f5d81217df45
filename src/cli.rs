use anyhow::{Context, Result};
use chrono::{Local, TimeZone};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::exit;

use crate::config::{Config, STORE_ENV};
use crate::script_manager::{ScriptEdit, ScriptManager};
use crate::system::{confirm, copy_to_clipboard, install_interrupt_handler};
use script_saver::{ExecutionOutcome, Script, ScriptDraft};

const DELETE_PROMPT: &str =
    "Are you sure you want to delete this script? This action cannot be undone.";

// CLI arguments parsing structure
#[derive(Parser)]
#[command(author, version, about = "Save, list and run named shell command sequences", long_about = None, disable_help_subcommand = true)]
pub struct Cli {
    /// Output results in JSON format
    #[arg(short = 'j', long, global = true)]
    pub json: bool,

    /// Path to the scripts file
    #[arg(long, env = STORE_ENV, global = true, value_name = "PATH")]
    pub store: Option<PathBuf>,

    /// More log output (-v info, -vv debug)
    #[arg(short = 'v', long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

// Commands as typed in the form's multi-line field
#[derive(Args, Debug)]
pub struct CommandsInput {
    /// Command to run; repeat the flag or separate commands with newlines
    #[arg(short = 'c', long = "command", value_name = "CMD")]
    pub commands: Vec<String>,

    /// Read the commands from standard input, one per line
    #[arg(long, conflicts_with = "commands")]
    pub stdin: bool,
}

impl CommandsInput {
    // Newline-delimited commands text, or None when nothing was given
    fn read(&self) -> Result<Option<String>> {
        if self.stdin {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .context("failed to read commands from stdin")?;
            return Ok(Some(text));
        }

        if self.commands.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.commands.join("\n")))
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Save a new script
    Add {
        /// Script name
        #[arg(short = 'n', long)]
        name: String,
        /// Working directory the commands run in
        #[arg(short = 'd', long)]
        dir: String,
        #[command(flatten)]
        input: CommandsInput,
    },
    /// Change a script's name, directory or commands
    Edit {
        /// Script id or name
        script: String,
        /// New script name
        #[arg(short = 'n', long)]
        name: Option<String>,
        /// New working directory
        #[arg(short = 'd', long)]
        dir: Option<String>,
        #[command(flatten)]
        input: CommandsInput,
    },
    /// List saved scripts, most recently used first
    List,
    /// Show a script's directory and commands
    Show {
        /// Script id or name
        script: String,
    },
    /// Execute a script and print its output
    Run {
        /// Script id or name
        script: String,
        /// Also copy the output to the clipboard
        #[arg(long)]
        copy: bool,
    },
    /// Copy a script's commands to the clipboard
    Copy {
        /// Script id or name
        script: String,
        /// Copy the full command line, directory change included
        #[arg(long)]
        full: bool,
        /// Print instead of copying
        #[arg(long)]
        stdout: bool,
    },
    /// Delete a script
    Delete {
        /// Script id or name
        script: String,
        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

#[derive(Serialize)]
struct RunReport<'a> {
    script: &'a Script,
    outcome: &'a ExecutionOutcome,
    output: String,
}

// One-line notice for a failed command, causes joined with ": "
pub fn error_notice(err: &anyhow::Error) -> String {
    format!("error: {err:#}")
}

// Execute the selected command
pub fn execute_command(cli: &Cli) -> Result<()> {
    let config = Config::resolve(cli.store.clone()).context("failed to resolve configuration")?;
    let manager = ScriptManager::new(&config);

    match &cli.command {
        Commands::Add { name, dir, input } => cmd_add(&manager, name, dir, input, cli.json),
        Commands::Edit {
            script,
            name,
            dir,
            input,
        } => {
            let edit = ScriptEdit {
                name: name.clone(),
                dir: dir.clone(),
                commands: input.read()?,
            };
            cmd_edit(&manager, script, edit, cli.json)
        }
        Commands::List => cmd_list(&manager, cli.json),
        Commands::Show { script } => cmd_show(&manager, script, cli.json),
        Commands::Run { script, copy } => cmd_run(&manager, script, *copy, cli.json),
        Commands::Copy {
            script,
            full,
            stdout,
        } => cmd_copy(&manager, script, *full, *stdout),
        Commands::Delete { script, yes } => cmd_delete(&manager, script, *yes),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize output to JSON")?;
    println!("{json}");
    Ok(())
}

// Command implementations
fn cmd_add(
    manager: &ScriptManager,
    name: &str,
    dir: &str,
    input: &CommandsInput,
    json_output: bool,
) -> Result<()> {
    let commands = input.read()?.unwrap_or_default();
    let draft = ScriptDraft::parse(name, dir, &commands)?;
    let script = manager
        .save_script(draft)
        .context("Failed to save script. Please try again.")?;

    if json_output {
        return print_json(&script);
    }

    println!("Script Saved (id {})", script.id);
    println!("try it out with: script-saver run {}", script.id);
    Ok(())
}

fn cmd_edit(manager: &ScriptManager, selector: &str, edit: ScriptEdit, json_output: bool) -> Result<()> {
    let script = manager.edit_script(selector, edit)?;

    if json_output {
        return print_json(&script);
    }

    println!("Script Updated: your changes have been saved");
    print_script_detail(&script);
    Ok(())
}

fn cmd_list(manager: &ScriptManager, json_output: bool) -> Result<()> {
    let scripts = manager.list_scripts()?;

    if json_output {
        return print_json(&scripts);
    }

    if scripts.is_empty() {
        println!("No Scripts Saved");
        println!("use 'script-saver add' to create your first command line script");
        println!("(store: {})", manager.store_path().display());
        return Ok(());
    }

    // Column widths for alignment
    let id_width = column_width(scripts.iter().map(|s| s.id.as_str()));
    let name_width = column_width(scripts.iter().map(|s| s.name.as_str()));

    println!("\u{001b}[4mSaved scripts:\u{001b}[0m");
    for script in &scripts {
        println!(
            "  [{:>id_width$}] {:<name_width$}  {:>2} cmd  {:<16}  {}",
            script.id,
            script.name,
            script.commands.len(),
            format_last_used(script.last_accessed),
            script.dir,
        );
    }

    Ok(())
}

// Widest value in characters; `{:<width$}` pads by characters too
fn column_width<'a>(values: impl Iterator<Item = &'a str>) -> usize {
    values.map(|value| value.chars().count()).max().unwrap_or(0)
}

fn cmd_show(manager: &ScriptManager, selector: &str, json_output: bool) -> Result<()> {
    let script = manager.find_script(selector)?;

    if json_output {
        return print_json(&script);
    }

    print_script_detail(&script);
    Ok(())
}

fn print_script_detail(script: &Script) {
    println!("\u{001b}[4m{}\u{001b}[0m [{}]", script.name, script.id);
    println!("  working directory:  {}", script.dir);
    println!("  number of commands: {}", script.commands.len());
    println!("  last used:          {}", format_last_used(script.last_accessed));
    println!();
    for command in &script.commands {
        println!("  {command}");
    }
}

fn cmd_run(manager: &ScriptManager, selector: &str, copy: bool, json_output: bool) -> Result<()> {
    let cancel = install_interrupt_handler()?;

    if !json_output {
        eprintln!("Executing script...");
    }
    let (script, outcome) = manager.execute_script(selector, cancel)?;
    let output = outcome.render();

    if json_output {
        print_json(&RunReport {
            script: &script,
            outcome: &outcome,
            output: output.clone(),
        })?;
    } else {
        match &outcome {
            ExecutionOutcome::Succeeded { .. } => println!("{output}"),
            ExecutionOutcome::Failed { .. } | ExecutionOutcome::Cancelled => eprintln!("{output}"),
        }
    }

    // A clipboard problem must not hide the run's own result
    if copy && outcome != ExecutionOutcome::Cancelled {
        match copy_to_clipboard(&output) {
            Ok(()) => eprintln!("output copied to clipboard"),
            Err(e) => eprintln!("warning: {e:#}"),
        }
    }

    // Non-zero exit for anything but a clean run
    match outcome {
        ExecutionOutcome::Succeeded { .. } => Ok(()),
        ExecutionOutcome::Failed { .. } => exit(1),
        ExecutionOutcome::Cancelled => exit(130),
    }
}

fn cmd_copy(manager: &ScriptManager, selector: &str, full: bool, to_stdout: bool) -> Result<()> {
    let script = manager.find_script(selector)?;
    let text = if full {
        script.command_line()
    } else {
        script.commands_text()
    };

    if to_stdout {
        println!("{text}");
        return Ok(());
    }

    copy_to_clipboard(&text)?;
    if full {
        println!("copied full command line of '{}'", script.name);
    } else {
        println!("copied commands of '{}'", script.name);
    }
    Ok(())
}

fn cmd_delete(manager: &ScriptManager, selector: &str, yes: bool) -> Result<()> {
    let removed = manager.delete_script(selector, |script| {
        if yes {
            return Ok(true);
        }
        eprintln!("Delete script '{}' [{}]", script.name, script.id);
        confirm(DELETE_PROMPT, &mut io::stdin().lock(), &mut io::stderr())
    })?;

    match removed {
        Some(script) => println!("Script Deleted: {}", script.name),
        None => println!("deletion cancelled"),
    }
    Ok(())
}

// Local time of the last use, or "never" for scripts without a timestamp
fn format_last_used(millis: i64) -> String {
    if millis <= 0 {
        return String::from("never");
    }
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map_or_else(|| String::from("unknown"), |time| time.format("%Y-%m-%d %H:%M").to_string())
}
