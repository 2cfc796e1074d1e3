use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
    str::FromStr,
    time::Instant,
};

use clap::{Parser, Subcommand};
use jyro::{
    CompileOptions, FinallyLowering, Iteration, LogTracer, Mode, NativeClass, ProxyMaker, ProxyOptions,
    classfile::{disasm::Disassembly, reader::parse_class, verify::check_class},
    compile_source,
    proxy::class_file_path,
};

#[derive(Parser)]
#[command(name = "jyro", version, about = "Compile Python modules to JVM class files")]
struct Cli {
    /// Log debug events
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a module to a class file
    Compile {
        file: PathBuf,
        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
        /// Class name; defaults to the file stem
        #[arg(long)]
        name: Option<String>,
        /// Options file (JSON); flags below override it
        #[arg(long)]
        options: Option<PathBuf>,
        #[arg(long, value_parser = parse_enum::<Mode>)]
        mode: Option<Mode>,
        #[arg(long, value_parser = parse_enum::<Iteration>)]
        iteration: Option<Iteration>,
        #[arg(long, value_parser = parse_enum::<FinallyLowering>)]
        finally: Option<FinallyLowering>,
        #[arg(long)]
        no_line_numbers: bool,
        /// Add a `main(String[])` entry point
        #[arg(long)]
        main: bool,
        /// Check stack depths of the result
        #[arg(long)]
        verify: bool,
    },
    /// Print a class file's pool, members and code
    Dump {
        file: PathBuf,
        #[arg(long)]
        verify: bool,
    },
    /// Generate a proxy class from a JSON description of a native type
    Proxy {
        file: PathBuf,
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
        /// Return zero values for missing overrides of abstract methods
        #[arg(long)]
        adapter: bool,
        /// Proxy class name inside the package; defaults to the native name
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        package: Option<String>,
    },
}

fn parse_enum<T: FromStr>(text: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    text.parse().map_err(|err: T::Err| err.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "jyro=debug" } else { "jyro=warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<(), String> {
    match command {
        Command::Compile {
            file,
            output,
            name,
            options,
            mode,
            iteration,
            finally,
            no_line_numbers,
            main,
            verify,
        } => {
            let mut opts = match options {
                Some(path) => CompileOptions::from_json(&read_text(&path)?).map_err(|err| context(&path, err))?,
                None => CompileOptions::default(),
            };
            if let Some(mode) = mode {
                opts.mode = mode;
            }
            if let Some(iteration) = iteration {
                opts.iteration = iteration;
            }
            if let Some(finally) = finally {
                opts.finally = finally;
            }
            opts.line_numbers &= !no_line_numbers;
            opts.emit_main |= main;

            let source = read_text(&file)?;
            let class_name = match name {
                Some(name) => name,
                None => file
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .ok_or_else(|| format!("{}: cannot derive a class name", file.display()))?
                    .to_owned(),
            };
            let start = Instant::now();
            let filename = file.to_string_lossy();
            let module =
                compile_source(&source, &class_name, &filename, &opts, LogTracer).map_err(|err| context(&file, err))?;
            tracing::info!(units = module.units.len(), elapsed = ?start.elapsed(), "compiled {}", file.display());
            let bytes = module.to_bytes().map_err(|err| context(&file, err))?;
            if verify {
                verify_bytes(&file, &bytes)?;
            }
            write_class(&output.join(class_file_path(&class_name)), &bytes)
        }
        Command::Dump { file, verify } => {
            let bytes = fs::read(&file).map_err(|err| context(&file, err))?;
            let class = parse_class(&bytes).map_err(|err| context(&file, err))?;
            print!("{}", Disassembly(&class));
            if verify {
                check_class(&class).map_err(|err| context(&file, err))?;
                println!("verified");
            }
            Ok(())
        }
        Command::Proxy {
            file,
            output,
            adapter,
            name,
            package,
        } => {
            let native: NativeClass = serde_json::from_str(&read_text(&file)?).map_err(|err| context(&file, err))?;
            let mut opts = ProxyOptions::new().adapter(adapter);
            if let Some(package) = package {
                opts = opts.package(package);
            }
            let name = name.unwrap_or_else(|| native.name.clone());
            let proxy = ProxyMaker::new(&name, &opts, LogTracer)
                .build(&native)
                .map_err(|err| context(&file, err))?;
            let bytes = proxy.to_bytes().map_err(|err| context(&file, err))?;
            verify_bytes(&file, &bytes)?;
            write_class(&output.join(proxy.relative_path()), &bytes)
        }
    }
}

fn context(path: &Path, err: impl std::fmt::Display) -> String {
    format!("{}: {err}", path.display())
}

fn read_text(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|err| context(path, err))
}

fn verify_bytes(path: &Path, bytes: &[u8]) -> Result<(), String> {
    let class = parse_class(bytes).map_err(|err| context(path, err))?;
    check_class(&class).map_err(|err| context(path, err))
}

fn write_class(path: &Path, bytes: &[u8]) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| context(parent, err))?;
    }
    fs::write(path, bytes).map_err(|err| context(path, err))?;
    println!("wrote {}", path.display());
    Ok(())
}
