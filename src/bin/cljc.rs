use std::fs;
use std::process::ExitCode;

use cljc::driver::{Driver, NO_SOURCE_PATH};
use cljc::options::CompilerOptions;
use cljc::parser::read_all;

struct Args {
    generate_asm: bool,
    options: CompilerOptions,
    expr: Option<String>,
    filename: Option<String>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = pico_args::Arguments::from_env();

    if args.contains(["-h", "--help"]) {
        println!("Usage: cljc [options] [file]");
        println!("Options:");
        println!("  -h, --help: Print this help message");
        println!("  -e <expr>: Evaluate an expression and print its value");
        println!("  --asm: Print the listing of every compiled unit");
        println!("  --allow-unresolved: Defer unresolved symbols to run time");
        println!("  --disable-locals-clearing: Keep locals alive until their scope ends");
        println!("  --warn-on-reflection: Warn about host calls resolved at run time");
        std::process::exit(0);
    }

    let generate_asm = args.contains("--asm");
    let options = CompilerOptions::from_env()
        .generate_asm(generate_asm)
        .allow_unresolved(args.contains("--allow-unresolved"))
        .disable_locals_clearing(args.contains("--disable-locals-clearing"))
        .warn_on_reflection(args.contains("--warn-on-reflection"));
    let expr = args.opt_value_from_str::<_, String>("-e").map_err(|e| e.to_string())?;
    let filename = args.opt_free_from_str::<String>().map_err(|e| e.to_string())?;
    if expr.is_none() && filename.is_none() {
        return Err("Usage: cljc [options] [-e expr] [file]".to_string());
    }
    Ok(Args { generate_asm, options, expr, filename })
}

fn run_with_listing(driver: &mut Driver, source: &str) -> Result<(), String> {
    let forms = read_all(source).map_err(|e| e.to_string())?;
    for form in &forms {
        let classes = driver.compile1(form).map_err(|e| e.to_string())?;
        for class in classes {
            if let Some(unit) = class.loaded_unit() {
                print!("{}", unit.unit.listing());
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut driver = Driver::new(args.options);
    if let Some(path) = &args.filename {
        let source = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Could not read {}: {}", path, e);
                return ExitCode::FAILURE;
            }
        };
        let loaded = if args.generate_asm {
            run_with_listing(&mut driver, &source)
        } else {
            driver.load_str(&source, path).map(|_| ()).map_err(|e| e.to_string())
        };
        if let Err(e) = loaded {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    }

    if let Some(expr) = &args.expr {
        if args.generate_asm {
            if let Err(e) = run_with_listing(&mut driver, expr) {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
            return ExitCode::SUCCESS;
        }
        match driver.load_str(expr, NO_SOURCE_PATH) {
            Ok(v) => println!("{}", v),
            Err(e) => {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}
