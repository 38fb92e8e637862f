//! Interactive shell for exploring a GRT runtime
//!
//! Loads metaclass definitions and modules, then drops into a prompt for
//! navigating the runtime's value tree (`cd`, `ls`, `show`, `set`) and
//! calling module functions (`call`).

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use grt_engine::{ListRef, Runtime, RuntimeOptions, Value};

#[derive(Debug, Parser)]
#[command(name = "grt-shell", about = "Interactive GRT runtime shell", version)]
struct Cli {
    /// Directories scanned for structs.*.json metaclass definitions
    #[arg(long = "structs", value_name = "DIR")]
    struct_dirs: Vec<PathBuf>,

    /// Directories scanned for loadable modules
    #[arg(long = "modules", value_name = "DIR")]
    module_dirs: Vec<PathBuf>,

    /// Module file extensions accepted by directory scans
    #[arg(long = "ext", value_name = "EXT", default_values_t = [String::from("grtmod")])]
    extensions: Vec<String>,

    /// Emit verbose progress messages
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let rt = Runtime::new(RuntimeOptions {
        verbose: cli.verbose,
        metaclass_paths: cli.struct_dirs.clone(),
        module_paths: cli.module_dirs.clone(),
    });

    for dir in &cli.struct_dirs {
        match rt.scan_metaclasses_in(dir) {
            Ok(count) => println!("loaded {count} classes from {}", dir.display()),
            Err(err) => eprintln!("error scanning {}: {err}", dir.display()),
        }
    }
    if let Err(err) = rt.end_loading_metaclasses() {
        eprintln!("metaclass validation failed: {err}");
        std::process::exit(1);
    }

    let extensions: Vec<&str> = cli.extensions.iter().map(|s| s.as_str()).collect();
    for dir in &cli.module_dirs {
        match rt.scan_modules_in(dir, &extensions) {
            Ok(count) => println!("loaded {count} modules from {}", dir.display()),
            Err(err) => eprintln!("error scanning {}: {err}", dir.display()),
        }
    }

    if let Err(err) = repl(&rt) {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn repl(rt: &Arc<Runtime>) -> Result<(), ReadlineError> {
    let mut editor = DefaultEditor::new()?;
    let mut cwd = String::from("/");

    println!("GRT shell - type 'help' for commands");
    loop {
        let prompt = format!("grt:{cwd}> ");
        let line = match editor.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);

        let mut parts = line.splitn(2, ' ');
        let command = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").trim();

        match command {
            "quit" | "exit" => break,
            "help" => print_help(),
            "cd" => match resolve(&cwd, rest) {
                Some(path) if rt.get(&path).is_some() => cwd = path,
                Some(path) => println!("no value at {path}"),
                None => println!("bad path"),
            },
            "ls" => {
                let path = resolve(&cwd, rest).unwrap_or_else(|| cwd.clone());
                match rt.get(&path) {
                    Some(value) => list_value(rt, &value),
                    None => println!("no value at {path}"),
                }
            }
            "show" => {
                let path = resolve(&cwd, rest).unwrap_or_else(|| cwd.clone());
                match rt.get(&path) {
                    Some(value) => println!("{}", value.to_display_string(rt)),
                    None => println!("no value at {path}"),
                }
            }
            "set" => {
                let mut args = rest.splitn(2, ' ');
                let (path, json) = (args.next().unwrap_or(""), args.next().unwrap_or(""));
                match (resolve(&cwd, path), serde_json::from_str(json)) {
                    (Some(path), Ok(json)) => {
                        let value = json_to_value(rt, &json);
                        if let Err(err) = rt.set(&path, value) {
                            println!("error: {err}");
                        }
                    }
                    (None, _) => println!("bad path"),
                    (_, Err(err)) => println!("bad value: {err}"),
                }
            }
            "classes" => {
                for class in rt.metaclasses() {
                    println!("{}", class.name());
                }
            }
            "modules" => {
                for module in rt.modules() {
                    println!("{} ({})", module.name(), module.loader_name());
                    for function in module.functions() {
                        println!("  {}", function.signature);
                    }
                }
            }
            "call" => {
                let mut args = rest.split_whitespace();
                let module = args.next().unwrap_or("");
                let function = args.next().unwrap_or("");
                let call_args = ListRef::new();
                let mut bad = false;
                for raw in args {
                    match serde_json::from_str(raw) {
                        Ok(json) => {
                            let value = json_to_value(rt, &json);
                            if let Err(err) = call_args.insert(rt, value) {
                                println!("bad argument {raw}: {err}");
                                bad = true;
                                break;
                            }
                        }
                        Err(err) => {
                            println!("bad argument {raw}: {err}");
                            bad = true;
                            break;
                        }
                    }
                }
                if !bad {
                    match rt.call_module_function(module, function, &call_args) {
                        Ok(result) => println!("{}", result.to_display_string(rt)),
                        Err(err) => println!("error: {err}"),
                    }
                }
            }
            other => println!("unknown command '{other}' - type 'help'"),
        }
    }
    Ok(())
}

fn print_help() {
    println!("  cd <path>                 change the current tree position");
    println!("  ls [path]                 list keys/members at a position");
    println!("  show [path]               print the value at a position");
    println!("  set <path> <json>         assign a value (JSON literal)");
    println!("  classes                   list registered metaclasses");
    println!("  modules                   list modules and their functions");
    println!("  call <mod> <fn> [json..]  call a module function");
    println!("  quit                      leave the shell");
}

/// Resolve a possibly relative path against the current position
fn resolve(cwd: &str, input: &str) -> Option<String> {
    let mut segments: Vec<String> = if input.starts_with('/') {
        Vec::new()
    } else {
        cwd.split('/').filter(|s| !s.is_empty()).map(String::from).collect()
    };
    for segment in input.split('/').filter(|s| !s.is_empty()) {
        match segment {
            "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other.to_string()),
        }
    }
    if segments.is_empty() {
        Some("/".to_string())
    } else {
        Some(format!("/{}", segments.join("/")))
    }
}

fn list_value(rt: &Runtime, value: &Value) {
    match value {
        Value::Dict(dict) => {
            for key in dict.keys() {
                println!("{key}");
            }
        }
        Value::List(list) => {
            for (i, item) in list.items().iter().enumerate() {
                println!("{i}: {}", summary(rt, item));
            }
        }
        Value::Object(object) => {
            if let Some(class) = rt.object_class_name(*object) {
                rt.foreach_member(&class, |member| {
                    println!("{} ({})", member.name, member.type_);
                });
            }
        }
        other => println!("{}", other.to_display_string(rt)),
    }
}

fn summary(rt: &Runtime, value: &Value) -> String {
    match value {
        Value::List(list) => format!("list ({} items)", list.count()),
        Value::Dict(dict) => format!("dict ({} keys)", dict.count()),
        Value::Object(object) => rt
            .object_class_name(*object)
            .unwrap_or_else(|| "object".to_string()),
        other => other.to_display_string(rt),
    }
}

/// Convert a JSON literal into a GRT value (arrays and objects become
/// fresh untyped containers)
fn json_to_value(rt: &Runtime, json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Integer(*b as i64),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else {
                Value::Double(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::from(s.as_str()),
        serde_json::Value::Array(items) => {
            let list = ListRef::new();
            for item in items {
                let value = json_to_value(rt, item);
                let _ = list.insert(rt, value);
            }
            Value::List(list)
        }
        serde_json::Value::Object(entries) => {
            let dict = grt_engine::DictRef::new();
            for (key, item) in entries {
                let value = json_to_value(rt, item);
                let _ = dict.set(rt, key, value);
            }
            Value::Dict(dict)
        }
    }
}
