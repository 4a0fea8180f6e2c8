use std::path::{Path, PathBuf};
use tracing::warn;
use zip::CompressionMethod;

use crate::archive::{is_archive, is_class_file};
use crate::cli::Cli;
use crate::error::ConfigError;
use crate::filter::{MemberFilter, VisibilityMask};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Scope {
    #[default]
    All,
    ClassFiles,
    Archives,
}

impl Scope {
    /// At most one of the three flags may be set; none means [`Scope::All`].
    pub fn from_flags(all: bool, class_files: bool, archives: bool) -> Result<Scope, ConfigError> {
        match (all, class_files, archives) {
            (_, false, false) => Ok(Scope::All),
            (false, true, false) => Ok(Scope::ClassFiles),
            (false, false, true) => Ok(Scope::Archives),
            _ => Err(ConfigError::ConflictingScope),
        }
    }

    pub fn accepts(&self, path: &Path, include_resources: bool) -> bool {
        let name = path.to_string_lossy();
        match self {
            Scope::All => is_class_file(&name) || is_archive(&name) || include_resources,
            Scope::ClassFiles => is_class_file(&name),
            Scope::Archives => is_archive(&name),
        }
    }
}

/// Read-only settings of one run; shared by reference across worker threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionConfig {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub recurse_subdirectories: bool,
    pub scope: Scope,
    pub preserve_references: bool,
    pub compress_output_archives: bool,
    pub visibility_mask: VisibilityMask,
    pub verbose: bool,
    pub include_non_class_resources: bool,
    pub max_nesting_depth: usize,
}

impl ConversionConfig {
    pub fn new(input_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            output_path: output_path.into(),
            recurse_subdirectories: false,
            scope: Scope::All,
            preserve_references: false,
            compress_output_archives: false,
            visibility_mask: VisibilityMask::all(),
            verbose: false,
            include_non_class_resources: true,
            max_nesting_depth: 16,
        }
    }

    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        if cli.input.as_os_str().is_empty() {
            return Err(ConfigError::MissingPath("input"));
        }
        if cli.output.as_os_str().is_empty() {
            return Err(ConfigError::MissingPath("output"));
        }
        let visibility_mask = match cli.keep.as_deref() {
            Some(list) => parse_keep_list(list)?,
            None => VisibilityMask::all(),
        };

        Ok(Self {
            input_path: cli.input.clone(),
            output_path: cli.output.clone(),
            recurse_subdirectories: cli.recurse,
            scope: Scope::from_flags(cli.all, cli.classfiles, cli.archives)?,
            preserve_references: cli.refs,
            compress_output_archives: cli.compress,
            visibility_mask,
            verbose: cli.verbose,
            include_non_class_resources: !cli.skip_resource_files,
            max_nesting_depth: cli.max_depth,
        })
    }

    pub fn member_filter(&self) -> MemberFilter {
        MemberFilter::new(self.visibility_mask, self.preserve_references)
    }

    pub fn compression(&self) -> CompressionMethod {
        if self.compress_output_archives {
            CompressionMethod::Deflated
        } else {
            CompressionMethod::Stored
        }
    }
}

/// Parses `private,protected,public,package,synthetic,all,none`.
pub fn parse_keep_list(list: &str) -> Result<VisibilityMask, ConfigError> {
    let mut mask = VisibilityMask::empty();
    let mut saw_none = false;
    let mut saw_other = false;

    for token in list.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let bits = match token.to_ascii_lowercase().as_str() {
            "private" => VisibilityMask::PRIVATE,
            "protected" => VisibilityMask::PROTECTED,
            "public" => VisibilityMask::PUBLIC,
            "package" => VisibilityMask::PACKAGE,
            "synthetic" => VisibilityMask::SYNTHETIC,
            "all" => VisibilityMask::all(),
            "none" => {
                saw_none = true;
                continue;
            }
            _ => return Err(ConfigError::UnknownKeep(token.to_string())),
        };
        saw_other = true;
        mask |= bits;
    }

    if !saw_none && !saw_other {
        return Err(ConfigError::UnknownKeep(list.to_string()));
    }
    if saw_none && saw_other {
        warn!(keep = list, "'none' combined with other keep options is ignored");
    }
    Ok(mask)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Directory(PathBuf),
    File(PathBuf),
}

/// Validates the input and creates the output root. Runs before anything is processed.
pub fn prepare_output_root(cfg: &ConversionConfig) -> Result<OutputTarget, ConfigError> {
    if !cfg.input_path.exists() {
        return Err(ConfigError::MissingInput(cfg.input_path.clone()));
    }
    let output = &cfg.output_path;
    if output.is_dir() {
        return Ok(OutputTarget::Directory(output.clone()));
    }
    if output.exists() {
        if cfg.input_path.is_file() {
            return Ok(OutputTarget::File(output.clone()));
        }
        return Err(ConfigError::OutputNotDirectory(output.clone()));
    }
    std::fs::create_dir_all(output)
        .map_err(|e| ConfigError::OutputNotCreatable(e, output.clone()))?;
    Ok(OutputTarget::Directory(output.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::fs;

    fn temp_dir(prefix: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!(
            "{prefix}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        p
    }

    #[test]
    fn scope_flags_are_mutually_exclusive() {
        assert_eq!(Scope::from_flags(false, false, false).unwrap(), Scope::All);
        assert_eq!(Scope::from_flags(true, false, false).unwrap(), Scope::All);
        assert_eq!(Scope::from_flags(false, true, false).unwrap(), Scope::ClassFiles);
        assert_eq!(Scope::from_flags(false, false, true).unwrap(), Scope::Archives);
        assert!(matches!(
            Scope::from_flags(true, true, false),
            Err(ConfigError::ConflictingScope)
        ));
        assert!(matches!(
            Scope::from_flags(false, true, true),
            Err(ConfigError::ConflictingScope)
        ));
    }

    #[test]
    fn scope_predicates() {
        let class = Path::new("a/B.class");
        let jar = Path::new("lib/x.JAR");
        let text = Path::new("README.txt");
        assert!(Scope::All.accepts(class, false));
        assert!(Scope::All.accepts(jar, false));
        assert!(!Scope::All.accepts(text, false));
        assert!(Scope::All.accepts(text, true));
        assert!(!Scope::ClassFiles.accepts(jar, true));
        assert!(!Scope::Archives.accepts(class, true));
    }

    #[test]
    fn keep_list_parsing() {
        assert_eq!(
            parse_keep_list("public, protected").unwrap(),
            VisibilityMask::PUBLIC | VisibilityMask::PROTECTED
        );
        assert_eq!(parse_keep_list("all").unwrap(), VisibilityMask::all());
        assert_eq!(parse_keep_list("none").unwrap(), VisibilityMask::empty());
        assert_eq!(
            parse_keep_list("none,package").unwrap(),
            VisibilityMask::PACKAGE
        );
        assert!(matches!(
            parse_keep_list("public,friends"),
            Err(ConfigError::UnknownKeep(t)) if t == "friends"
        ));
        assert!(parse_keep_list("").is_err());
    }

    #[test]
    fn from_cli_maps_every_flag() {
        let cli = Cli::parse_from([
            "class-stubber",
            "-i",
            "in",
            "-o",
            "out",
            "-s",
            "--archives",
            "--refs",
            "--compress",
            "--keep",
            "public",
            "--skip-resource-files",
            "--max-depth",
            "3",
        ]);
        let cfg = ConversionConfig::from_cli(&cli).unwrap();
        assert!(cfg.recurse_subdirectories);
        assert_eq!(cfg.scope, Scope::Archives);
        assert!(cfg.preserve_references);
        assert_eq!(cfg.compression(), CompressionMethod::Deflated);
        assert_eq!(cfg.visibility_mask, VisibilityMask::PUBLIC);
        assert!(!cfg.include_non_class_resources);
        assert_eq!(cfg.max_nesting_depth, 3);
        assert!(cfg.member_filter().preserve_references);
    }

    #[test]
    fn output_root_is_created() {
        let base = temp_dir("class-stubber-config");
        let input = base.join("in");
        fs::create_dir_all(&input).unwrap();
        let cfg = ConversionConfig::new(&input, base.join("out/nested"));

        let target = prepare_output_root(&cfg).unwrap();
        assert_eq!(target, OutputTarget::Directory(base.join("out/nested")));
        assert!(base.join("out/nested").is_dir());
        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn file_output_root_only_for_single_file_input() {
        let base = temp_dir("class-stubber-config-file");
        fs::create_dir_all(base.join("dir")).unwrap();
        fs::write(base.join("A.class"), b"x").unwrap();
        fs::write(base.join("taken"), b"x").unwrap();

        let single = ConversionConfig::new(base.join("A.class"), base.join("taken"));
        assert_eq!(
            prepare_output_root(&single).unwrap(),
            OutputTarget::File(base.join("taken"))
        );

        let tree = ConversionConfig::new(base.join("dir"), base.join("taken"));
        assert!(matches!(
            prepare_output_root(&tree),
            Err(ConfigError::OutputNotDirectory(_))
        ));

        let missing = ConversionConfig::new(base.join("nope"), base.join("out"));
        assert!(matches!(
            prepare_output_root(&missing),
            Err(ConfigError::MissingInput(_))
        ));
        let _ = fs::remove_dir_all(&base);
    }
}
