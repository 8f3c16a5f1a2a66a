//! Program build options.

use std::fmt;
use std::path::PathBuf;

/// Kernel language revision selected with `-cl-std=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LanguageVersion {
    Cl1_1,
    Cl1_2,
    Cl2_0,
}

impl LanguageVersion {
    /// Value of `__OPENCL_C_VERSION__`.
    pub fn macro_value(&self) -> u32 {
        match self {
            LanguageVersion::Cl1_1 => 110,
            LanguageVersion::Cl1_2 => 120,
            LanguageVersion::Cl2_0 => 200,
        }
    }
}

impl fmt::Display for LanguageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LanguageVersion::Cl1_1 => "CL1.1",
            LanguageVersion::Cl1_2 => "CL1.2",
            LanguageVersion::Cl2_0 => "CL2.0",
        })
    }
}

/// Parsed form of a build option string such as `-D N=4 -cl-std=CL1.2`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    raw: String,
    pub defines: Vec<(String, String)>,
    pub include_dirs: Vec<PathBuf>,
    pub language_version: Option<LanguageVersion>,
    pub suppress_warnings: bool,
    pub warnings_as_errors: bool,
    pub fast_relaxed_math: bool,
    pub mad_enable: bool,
}

impl BuildOptions {
    /// Parse an option string. The error is a build-log message.
    pub fn parse(options: &str) -> std::result::Result<Self, String> {
        let mut parsed = BuildOptions {
            raw: options.trim().to_string(),
            ..Default::default()
        };
        let mut tokens = options.split_whitespace();

        while let Some(token) = tokens.next() {
            match token {
                "-w" => parsed.suppress_warnings = true,
                "-Werror" => parsed.warnings_as_errors = true,
                "-cl-fast-relaxed-math" => parsed.fast_relaxed_math = true,
                "-cl-mad-enable" => parsed.mad_enable = true,
                "-D" => {
                    let def = tokens
                        .next()
                        .ok_or_else(|| "missing macro name after '-D'".to_string())?;
                    parsed.defines.push(parse_define(def)?);
                }
                "-I" => {
                    let dir = tokens
                        .next()
                        .ok_or_else(|| "missing directory after '-I'".to_string())?;
                    parsed.include_dirs.push(PathBuf::from(dir));
                }
                t if t.starts_with("-D") => parsed.defines.push(parse_define(&t[2..])?),
                t if t.starts_with("-I") => parsed.include_dirs.push(PathBuf::from(&t[2..])),
                t if t.starts_with("-cl-std=") => {
                    parsed.language_version = Some(match &t["-cl-std=".len()..] {
                        "CL1.1" => LanguageVersion::Cl1_1,
                        "CL1.2" => LanguageVersion::Cl1_2,
                        "CL2.0" => LanguageVersion::Cl2_0,
                        other => return Err(format!("invalid value '{other}' in '-cl-std='")),
                    });
                }
                other => return Err(format!("unrecognized build option '{other}'")),
            }
        }

        Ok(parsed)
    }

    /// The option string as supplied.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn language_version_or_default(&self) -> LanguageVersion {
        self.language_version.unwrap_or(LanguageVersion::Cl1_2)
    }
}

fn parse_define(def: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = match def.split_once('=') {
        Some((name, value)) => (name, value),
        None => (def, "1"),
    };
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric());
    if !valid {
        return Err(format!("macro name '{name}' is not an identifier"));
    }
    Ok((name.to_string(), value.to_string()))
}
