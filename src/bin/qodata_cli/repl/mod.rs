mod history;

use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::commands;
use crate::context::Context;
use crate::utils::error::CliError;
use crate::formatters::OutputFormat;

use self::history::History;

const HISTORY_FILE: &str = ".qodata_history";

/// Interactive mode: bare input is a URL, `.`-prefixed input a command
pub struct Repl {
    context: Context,
    editor: DefaultEditor,
    history: History,
}

impl Repl {
    pub fn new(context: Context) -> Result<Self> {
        let mut editor = DefaultEditor::new()?;
        let mut history = History::new(HISTORY_FILE, 1000);
        if let Err(e) = history.load() {
            log::warn!("history not loaded: {}", e);
        }
        for entry in history.entries() {
            let _ = editor.add_history_entry(entry.as_str());
        }

        Ok(Repl { context, editor, history })
    }

    pub fn run(&mut self) -> Result<()> {
        println!("{}", self.context.formatter().format_info("qodata interactive mode"));
        println!("{}", self.context.formatter().format_info("Type a URL to plan it, .help for commands, .exit to quit"));

        loop {
            match self.editor.readline("qodata> ") {
                Ok(line) => {
                    let _ = self.editor.add_history_entry(line.as_str());
                    self.history.add(&line);
                    match self.process_line(line.trim()) {
                        Ok(true) => {},
                        Ok(false) => break,
                        Err(e) => println!("{}", self.context.formatter().format_error(&e.to_string())),
                    }
                },
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(err) => {
                    println!("{}", self.context.formatter().format_error(&err.to_string()));
                    break;
                },
            }
        }

        self.history.save()
    }

    /// Returns false when the session should end
    fn process_line(&mut self, line: &str) -> Result<bool> {
        if line.is_empty() {
            return Ok(true);
        }
        match line.strip_prefix('.') {
            Some(command) => self.process_command(command),
            None => {
                if self.context.require_schema().is_ok() {
                    commands::plan::execute(&self.context, line)?;
                } else {
                    commands::parse::execute(&self.context, line)?;
                }
                Ok(true)
            },
        }
    }

    fn process_command(&mut self, command: &str) -> Result<bool> {
        let (name, argument) = match command.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (command, ""),
        };

        match name {
            "help" => self.print_help(),
            "exit" | "quit" => return Ok(false),
            "parse" => commands::parse::execute(&self.context, required(argument, ".parse <url>")?)?,
            "plan" => commands::plan::execute(&self.context, required(argument, ".plan <url>")?)?,
            "run" => commands::run::execute(&self.context, required(argument, ".run <url>")?)?,
            "list" => commands::list::execute(&self.context)?,
            "format" => {
                let format: OutputFormat = required(argument, ".format <text|json|table>")?.parse()?;
                self.context.set_format(format);
                println!("{}", self.context.formatter().format_success(&format!("format set to {}", argument)));
            },
            "history" => {
                let entries: Vec<&String> = if argument.is_empty() {
                    self.history.entries().collect()
                } else {
                    self.history.search(argument).collect()
                };
                for (i, entry) in entries.iter().enumerate() {
                    println!("{:>4}  {}", i + 1, entry);
                }
            },
            other => return Err(CliError::UnknownCommand(other.to_string()).into()),
        }
        Ok(true)
    }

    fn print_help(&self) {
        println!("Commands:");
        println!("  .help                      Show this help");
        println!("  .exit, .quit               Leave interactive mode");
        println!("  .parse <url>               Print the request descriptor");
        println!("  .plan <url>                Print the compiled query plan");
        println!("  .run <url>                 Run the plan against the loaded data");
        println!("  .list                      List entity sets");
        println!("  .format <text|json|table>  Change the output format");
        println!("  .history [pattern]         Show previous input");
        println!();
        println!("Any other input is planned as a URL, or parsed when no schema is loaded.");
    }
}

fn required<'a>(argument: &'a str, usage: &'static str) -> Result<&'a str, CliError> {
    if argument.is_empty() {
        Err(CliError::Usage(usage))
    } else {
        Ok(argument)
    }
}
