use rpal_cse::json::{node_from_json, node_to_json};
use rpal_cse::rpal::parse_rpal;
use rpal_cse::{Error, Node, Symbol, evaluate, standardize};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::panic;
use std::process;
use tracing_subscriber::EnvFilter;

/// Which trees to print before evaluating
#[derive(Debug, Default, Clone, Copy)]
struct TreeOutput {
    ast: bool,
    st: bool,
    json: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut display = TreeOutput::default();
    let mut file = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "-ast" => display.ast = true,
            "-st" => display.st = true,
            _ => file = Some(arg),
        }
    }

    // With a file argument, run it once like the classic command-line interpreter
    if let Some(path) = file {
        match std::fs::read_to_string(&path) {
            Ok(source) => match run_program(&source, display) {
                Ok(result) => println!("{result}"),
                Err(e) => {
                    eprintln!("{e}");
                    process::exit(1);
                }
            },
            Err(e) => {
                eprintln!("Cannot read {path}: {e}");
                process::exit(1);
            }
        }
        return;
    }

    let result = panic::catch_unwind(|| {
        run_repl(display);
    });

    if let Err(panic_info) = result {
        eprintln!("The REPL encountered an unexpected error and must exit.");

        if let Some(msg) = panic_info.downcast_ref::<&str>() {
            eprintln!("Error: {msg}");
        } else if let Some(msg) = panic_info.downcast_ref::<String>() {
            eprintln!("Error: {msg}");
        } else {
            eprintln!("Error: Unknown panic occurred");
        }

        process::exit(1);
    }
}

fn run_repl(mut display: TreeOutput) {
    println!("RPAL interpreter on a CSE machine");
    println!("Enter programs like: let rec F n = n eq 0 -> 1 | n * F (n - 1) in F 5");
    println!("Enter JSON trees like: {{\"+\": [{{\"int\": 1}}, {{\"int\": 2}}]}}");
    println!("Type :help for more commands, or Ctrl+C to exit.");
    println!();

    let mut rl = DefaultEditor::new().expect("Could not initialize REPL");

    loop {
        match rl.readline("rpal> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                match line {
                    ":help" => {
                        print_help();
                        continue;
                    }
                    ":ast" => {
                        display.ast = !display.ast;
                        println!("Raw tree printing {}", on_off(display.ast));
                        continue;
                    }
                    ":st" => {
                        display.st = !display.st;
                        println!("Standardized tree printing {}", on_off(display.st));
                        continue;
                    }
                    ":json" => {
                        display.json = !display.json;
                        println!("JSON tree printing {}", on_off(display.json));
                        continue;
                    }
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }

                if let Some(path) = line.strip_prefix(":load ") {
                    match std::fs::read_to_string(path.trim()) {
                        Ok(source) => report(run_program(&source, display)),
                        Err(e) => println!("Error: cannot read {path}: {e}"),
                    }
                    continue;
                }

                report(run_program(line, display));
            }

            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

/// Parse RPAL source, or a JSON tree when the input starts with `{`, then
/// evaluate it
fn run_program(source: &str, display: TreeOutput) -> Result<Symbol, Error> {
    let tree: Node = if source.trim_start().starts_with('{') {
        node_from_json(source)?
    } else {
        parse_rpal(source)?
    };

    if display.ast {
        print!("{tree}");
    }
    if display.json {
        println!("{}", node_to_json(&tree));
    }
    if display.st {
        print!("{}", standardize(&tree)?);
    }

    evaluate(&tree)
}

fn report(result: Result<Symbol, Error>) {
    match result {
        Ok(result) => println!("{result}"),
        Err(e) => println!("Error: {e}"),
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}

fn print_help() {
    println!("RPAL interpreter commands:");
    println!("  :help       - Show this help message");
    println!("  :ast        - Toggle printing the raw parse tree");
    println!("  :st         - Toggle printing the standardized tree");
    println!("  :json       - Toggle printing the raw tree as JSON");
    println!("  :load FILE  - Run a program from a file");
    println!("  :quit       - Exit the interpreter");
    println!("  :exit       - Exit the interpreter");
    println!("  Ctrl+C      - Exit the interpreter");
    println!();
    println!("Command line: repl [-ast] [-st] [FILE]");
    println!("Set RUST_LOG=rpal_cse=trace to follow every machine transition.");
    println!();
    println!("Examples:");
    println!("  let x = 3 in x + 4");
    println!("  Print (Conc 'ab' 'cd')");
    println!("  let rec fib n = n ls 2 -> n | fib (n - 1) + fib (n - 2) in fib 10");
    println!("  (fn (x, y) . x * y) (6, 7)");
    println!();
}
