use std::path::PathBuf;
use std::process;

use argh::FromArgs;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use shrew::reader::parse_program;
use shrew::{Error, Interpreter, InterpreterConfig, ParseErrorKind, Value};
use tracing_subscriber::EnvFilter;

#[derive(FromArgs)]
/// Shrew Lisp interpreter
struct Args {
    /// enter the REPL after running the script
    #[argh(switch, short = 'i')]
    interactive: bool,
    /// collect garbage after a top-level form once this many values are live
    #[argh(option)]
    gc_threshold: Option<usize>,
    /// script to evaluate before (or instead of) the REPL
    #[argh(positional)]
    script: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Args = argh::from_env();
    let config = InterpreterConfig {
        gc_threshold: args.gc_threshold,
        ..InterpreterConfig::default()
    };
    let mut interp = match Interpreter::with_config(config) {
        Ok(interp) => interp,
        Err(e) => {
            eprintln!("Could not create interpreter: {e}");
            process::exit(1);
        }
    };

    if let Some(script) = &args.script {
        let source = match std::fs::read_to_string(script) {
            Ok(source) => source,
            Err(e) => {
                eprintln!("Cannot read {}: {e}", script.display());
                process::exit(1);
            }
        };
        if let Err(e) = interp.eval_str(&source) {
            eprintln!("Evaluation error: {e}");
            process::exit(1);
        }
        if !args.interactive {
            return;
        }
    }

    run_repl(&mut interp);
}

fn run_repl(interp: &mut Interpreter) {
    println!("Welcome to the Shrew REPL!");
    println!("Enter S-expressions like: (+ 1 2)");
    println!("Type :help for more commands, or Ctrl+D to exit.");
    println!();

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Could not initialize REPL: {e}");
            process::exit(1);
        }
    };
    let mut pending = String::new();

    loop {
        let prompt = if pending.is_empty() { "-> " } else { "... " };
        match rl.readline(prompt) {
            Ok(line) => {
                if pending.is_empty() {
                    match line.trim() {
                        "" => continue,
                        ":help" => {
                            print_help();
                            continue;
                        }
                        ":env" => {
                            print_environment(interp);
                            continue;
                        }
                        ":gc" => {
                            let stats = interp.collect_garbage(&[]);
                            println!(
                                "Released {} values and {} frames.",
                                stats.released_values, stats.released_frames
                            );
                            continue;
                        }
                        ":heap" => {
                            println!(
                                "Live values: {}, live frames: {}",
                                interp.heap().live_values(),
                                interp.heap().live_frames()
                            );
                            continue;
                        }
                        ":quit" | ":exit" => {
                            println!("Goodbye!");
                            break;
                        }
                        _ => {}
                    }
                }

                pending.push_str(&line);
                pending.push('\n');

                // Keep reading while the input is an unfinished form
                let program = match parse_program(&pending) {
                    Ok(program) => program,
                    Err(Error::ParseError(e)) if e.kind == ParseErrorKind::Incomplete => continue,
                    Err(e) => {
                        println!("Parse error: {e}");
                        pending.clear();
                        continue;
                    }
                };
                let _ = rl.add_history_entry(pending.trim_end());
                pending.clear();

                let global = interp.global_env();
                for form in &program {
                    match interp.evaluate(form, global) {
                        Ok(value) => {
                            println!("{}", interp.display(value));
                            interp.maybe_collect(&[]);
                        }
                        Err(e) if e.is_fatal() => {
                            eprintln!("Fatal error: {e}");
                            process::exit(1);
                        }
                        Err(e) => {
                            println!("Evaluation error: {e}");
                            break;
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C abandons the current input
                pending.clear();
            }
            Err(ReadlineError::Eof) => {
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

fn print_help() {
    println!("Shrew Lisp:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show global environment bindings");
    println!("  :gc        - Run a garbage collection now");
    println!("  :heap      - Show live heap objects");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+D     - Exit the interpreter");
    println!();
    println!("Special forms:");
    println!("  quote quasiquote unquote unquote-splicing define set lambda defmacro");
    println!("  if cond begin and or");
    println!();
    println!("Examples:");
    println!("  (define make-adder (lambda (a) (lambda (x) (+ x a))))");
    println!("  ((make-adder 7) 9)");
    println!("  `(1 ,(+ 1 1) ,@(list 3 4))");
    println!("  (cond (#f 'no #t 'yes))");
    println!();
}

fn print_environment(interp: &Interpreter) {
    let bindings = interp.global_bindings();

    // Separate built-in functions from user-defined values
    let mut builtins = Vec::new();
    let mut user_defined = Vec::new();
    for (name, value) in bindings {
        match interp.value(value) {
            Value::Builtin(_) => builtins.push(name),
            _ => user_defined.push((name, value)),
        }
    }

    if !builtins.is_empty() {
        println!("Built-in functions ({}):", builtins.len());
        // Print in columns for readability
        let mut col = 0;
        for name in builtins {
            print!("  {name:<15}");
            col += 1;
            if col % 4 == 0 {
                println!();
            }
        }
        if col % 4 != 0 {
            println!();
        }
        println!();
    }

    if user_defined.is_empty() {
        println!("No user-defined values.");
    } else {
        println!("User-defined values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {}", interp.display(value));
        }
    }
}
