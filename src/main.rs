use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Default)]
struct CliArgs {
    folders: Vec<PathBuf>,
    null_audio: bool,
    recap: bool,
}

fn main() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1).collect())?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("artic=info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    artic::app::run(artic::app::AppOptions {
        folders: args.folders,
        null_audio: args.null_audio,
        recap_only: args.recap,
    })
}

fn parse_args(args: Vec<String>) -> anyhow::Result<CliArgs> {
    let mut out = CliArgs::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--folder" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--folder requires a directory");
                };
                if value.trim().is_empty() {
                    anyhow::bail!("--folder cannot be empty");
                }
                out.folders.push(PathBuf::from(value.trim()));
            }
            "--null-audio" => out.null_audio = true,
            "--recap" => out.recap = true,
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument {other}"),
        }
        index += 1;
    }
    Ok(out)
}

fn print_help() {
    println!("artic");
    println!("  --folder DIR      Add a music folder to the library (repeatable)");
    println!("  --null-audio      Play without an audio device");
    println!("  --recap           Print the listening recap and exit");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn parses_repeated_folders_and_flags() {
        let parsed = parse_args(args(&["--folder", "/a", "--null-audio", "--folder", "/b"]))
            .expect("parse");
        assert_eq!(parsed.folders, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert!(parsed.null_audio);
        assert!(!parsed.recap);
    }

    #[test]
    fn rejects_missing_folder_value_and_unknown_flags() {
        assert!(parse_args(args(&["--folder"])).is_err());
        assert!(parse_args(args(&["--folder", "  "])).is_err());
        assert!(parse_args(args(&["--volume"])).is_err());
    }
}
