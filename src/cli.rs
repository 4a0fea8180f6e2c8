use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "class-stubber")]
#[command(about = "Convert class files and jar/zip archives into API stubs")]
pub struct Cli {
    /// Class file, archive, or directory to convert.
    #[arg(short = 'i', long, value_name = "PATH")]
    pub input: PathBuf,

    /// Directory receiving the converted files.
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output: PathBuf,

    /// Descend into subdirectories of a directory input.
    #[arg(short = 's', long)]
    pub recurse: bool,

    /// Process .class and archive files (default).
    #[arg(long)]
    pub all: bool,

    /// Process only .class files.
    #[arg(long)]
    pub classfiles: bool,

    /// Process only archive files (.jar/.zip).
    #[arg(long)]
    pub archives: bool,

    /// Keep the symbolic references of method bodies.
    #[arg(long)]
    pub refs: bool,

    /// Deflate entries of the resulting archives.
    #[arg(long)]
    pub compress: bool,

    /// Members to keep: private,protected,public,package,synthetic,all,none.
    #[arg(long, value_name = "LIST")]
    pub keep: Option<String>,

    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Do not copy non-class files.
    #[arg(long)]
    pub skip_resource_files: bool,

    #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Write a JSON list of produced files and their SHA-256 hashes.
    #[arg(long, value_name = "FILE")]
    pub manifest: Option<PathBuf>,

    /// Maximum depth of archives nested inside archives.
    #[arg(long, value_name = "N", default_value_t = 16)]
    pub max_depth: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

const LEGACY_FLAGS: &[(&str, &str)] = &[
    ("-input", "--input"),
    ("-output", "--output"),
    ("-all", "--all"),
    ("-archives", "--archives"),
    ("-classfiles", "--classfiles"),
    ("-refs", "--refs"),
    ("-compress", "--compress"),
    ("-verbose", "--verbose"),
    ("-skipresourcefiles", "--skip-resource-files"),
];

const VALUE_OPTIONS: &[&str] = &[
    "-i", "--input", "-o", "--output", "--keep", "-f", "--format", "--manifest", "--max-depth",
];

/// Accepts the single-dash spelling of the old converter (`-input x -keep:public,package`).
pub fn rewrite_legacy_args(args: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut iter = args.into_iter();
    if let Some(program) = iter.next() {
        out.push(program);
    }

    let mut expects_value = false;
    let mut passthrough = false;
    for arg in iter {
        if passthrough || expects_value {
            expects_value = false;
            out.push(arg);
            continue;
        }
        if arg == "--" {
            passthrough = true;
            out.push(arg);
            continue;
        }

        let rewritten = if let Some(list) = arg.strip_prefix("-keep:") {
            format!("--keep={list}")
        } else if let Some((_, long)) = LEGACY_FLAGS.iter().find(|(legacy, _)| *legacy == arg) {
            long.to_string()
        } else {
            arg
        };

        expects_value = VALUE_OPTIONS.contains(&rewritten.as_str());
        out.push(rewritten);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn legacy_arguments_become_long_options() {
        let rewritten = rewrite_legacy_args(args(&[
            "class-stubber",
            "-input",
            "lib",
            "-output",
            "out",
            "-refs",
            "-keep:public,protected",
            "-classfiles",
            "-skipresourcefiles",
            "-s",
            "-v",
        ]));
        assert_eq!(
            rewritten,
            args(&[
                "class-stubber",
                "--input",
                "lib",
                "--output",
                "out",
                "--refs",
                "--keep=public,protected",
                "--classfiles",
                "--skip-resource-files",
                "-s",
                "-v",
            ])
        );
    }

    #[test]
    fn rewritten_arguments_parse() {
        let cli = Cli::try_parse_from(rewrite_legacy_args(args(&[
            "class-stubber",
            "-input",
            "in.jar",
            "-output",
            "out",
            "-keep:public",
            "-compress",
        ])))
        .unwrap();
        assert_eq!(cli.input, PathBuf::from("in.jar"));
        assert_eq!(cli.output, PathBuf::from("out"));
        assert_eq!(cli.keep.as_deref(), Some("public"));
        assert!(cli.compress);
        assert!(!cli.refs);
        assert_eq!(cli.format, OutputFormat::Text);
        assert_eq!(cli.max_depth, 16);
    }

    #[test]
    fn modern_arguments_are_untouched() {
        let original = args(&["class-stubber", "-i", "a", "-o", "b", "--refs", "--", "-all"]);
        assert_eq!(rewrite_legacy_args(original.clone()), original);
    }
}
