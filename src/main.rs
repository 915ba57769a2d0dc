use clap::Parser;
use std::io::Read;

use derp::{ErrorState, Vm};

#[derive(Parser)]
#[command(name = "derp")]
#[command(about = "An embeddable scripting-language VM")]
#[command(version)]
struct Cli {
    /// Execute the script from command line argument
    #[arg(short = 'c')]
    script: Option<String>,

    /// Output results as JSON ({stdout, result, error})
    #[arg(long = "json")]
    json: bool,

    /// Script file to execute
    #[arg()]
    script_file: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    let script = if let Some(s) = cli.script {
        s
    } else if let Some(ref file) = cli.script_file {
        match std::fs::read_to_string(file) {
            Ok(content) => content,
            Err(e) => {
                eprintln!("Error: Cannot read script file: {}: {}", file, e);
                std::process::exit(1);
            }
        }
    } else {
        use std::io::IsTerminal;
        if std::io::stdin().is_terminal() {
            eprintln!("Error: No script provided. Use -c 'script', provide a script file, or pipe via stdin.");
            std::process::exit(1);
        }
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).unwrap_or_default();
        buf
    };

    let mut vm = Vm::new();
    let mut errors = ErrorState::new();
    let file_name = cli.script_file.as_deref().unwrap_or("<command-line>");
    let result = vm.eval_string(&script, &mut errors, file_name);

    if cli.json {
        let payload = match &result {
            Some(v) if !errors.has_errors() => serde_json::json!({
                "result": format!("{:?}", v.borrow()),
                "error": null,
            }),
            _ => serde_json::json!({
                "result": null,
                "error": errors.all_error_text(),
            }),
        };
        println!("{}", payload);
    } else if errors.has_errors() {
        eprintln!("{}", errors.all_error_text());
    } else if let Some(v) = result {
        println!("{:?}", v.borrow());
    }

    std::process::exit(if errors.has_errors() { 1 } else { 0 });
}
