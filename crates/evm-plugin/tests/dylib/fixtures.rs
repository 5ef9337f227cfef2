//! Small shared libraries built on demand with `rustc`.
//!
//! Each fixture is a dependency-free cdylib exporting exactly the symbols it is configured with,
//! so every loader failure can be produced from a real artifact. Handlers copy the payload they
//! receive into their reply message and return a fixed status byte.

use std::{
    env,
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
    process::Command,
    sync::OnceLock,
};

use tempfile::TempDir;

/// Symbol set of one fixture artifact.
pub(crate) struct Fixture {
    pub(crate) crate_name: &'static str,
    pub(crate) abi_version: Option<u32>,
    pub(crate) descriptor: Option<&'static str>,
    pub(crate) handlers: &'static [(&'static str, u8)],
}

/// Answers `TXSTART` with status 0 and `EXTERNALINFOSTART` with status 1.
pub(crate) const ECHO: Fixture = Fixture {
    crate_name: "fixture_echo",
    abi_version: Some(1),
    descriptor: Some(
        r#"{"pluginname":"fixture-echo","option":{"TXSTART":"FixtureEcho","EXTERNALINFOSTART":"FixtureVeto"}}"#,
    ),
    handlers: &[("FixtureEcho", 0), ("FixtureVeto", 1)],
};

pub(crate) const NO_ABI_VERSION: Fixture = Fixture {
    crate_name: "fixture_no_abi",
    abi_version: None,
    descriptor: Some(r#"{"pluginname":"fixture-no-abi","option":{}}"#),
    handlers: &[],
};

pub(crate) const WRONG_ABI_VERSION: Fixture = Fixture {
    crate_name: "fixture_wrong_abi",
    abi_version: Some(99),
    descriptor: Some(r#"{"pluginname":"fixture-wrong-abi","option":{}}"#),
    handlers: &[],
};

pub(crate) const NO_REGISTER: Fixture = Fixture {
    crate_name: "fixture_no_register",
    abi_version: Some(1),
    descriptor: None,
    handlers: &[("FixtureEcho", 0)],
};

/// Declares a `TXEND` handler it does not export.
pub(crate) const MISSING_HANDLER: Fixture = Fixture {
    crate_name: "fixture_missing_handler",
    abi_version: Some(1),
    descriptor: Some(
        r#"{"pluginname":"fixture-partial","option":{"TXSTART":"FixtureEcho","TXEND":"FixtureAbsent"}}"#,
    ),
    handlers: &[("FixtureEcho", 0)],
};

pub(crate) const NAMELESS: Fixture = Fixture {
    crate_name: "fixture_nameless",
    abi_version: Some(1),
    descriptor: Some(r#"{"option":{"TXSTART":"FixtureEcho"}}"#),
    handlers: &[("FixtureEcho", 0)],
};

const ALL: [&Fixture; 6] =
    [&ECHO, &NO_ABI_VERSION, &WRONG_ABI_VERSION, &NO_REGISTER, &MISSING_HANDLER, &NAMELESS];

impl Fixture {
    fn source(&self) -> String {
        let mut src = String::from(
            "#![allow(non_snake_case, dead_code)]\n\
             #[repr(C)]\n\
             pub struct RawSlice { ptr: *const u8, len: usize }\n\
             static ECHO: std::sync::Mutex<Vec<u8>> = std::sync::Mutex::new(Vec::new());\n",
        );
        if let Some(version) = self.abi_version {
            writeln!(src, "#[no_mangle] pub extern \"C\" fn plugin_abi_version() -> u32 {{ {version} }}").unwrap();
        }
        if let Some(descriptor) = self.descriptor {
            writeln!(src, "static DESCRIPTOR: &[u8] = br#\"{descriptor}\"#;").unwrap();
            src.push_str(
                "#[no_mangle] pub extern \"C\" fn Register() -> RawSlice { \
                 RawSlice { ptr: DESCRIPTOR.as_ptr(), len: DESCRIPTOR.len() } }\n",
            );
        }
        for (symbol, status) in self.handlers {
            writeln!(
                src,
                "#[no_mangle] pub unsafe extern \"C\" fn {symbol}(payload: RawSlice, message: *mut RawSlice) -> u8 {{\n\
                 let bytes = if payload.ptr.is_null() {{ &[][..] }} else {{ std::slice::from_raw_parts(payload.ptr, payload.len) }};\n\
                 let mut echo = ECHO.lock().unwrap();\n\
                 echo.clear();\n\
                 echo.extend_from_slice(bytes);\n\
                 *message = RawSlice {{ ptr: echo.as_ptr(), len: echo.len() }};\n\
                 {status}\n\
                 }}"
            )
            .unwrap();
        }
        src
    }

    fn file_name(&self) -> String {
        format!("{}{}{}", env::consts::DLL_PREFIX, self.crate_name, env::consts::DLL_SUFFIX)
    }

    fn build(&self, dir: &Path) -> PathBuf {
        let source = dir.join(format!("{}.rs", self.crate_name));
        fs::write(&source, self.source()).unwrap();
        let artifact = dir.join(self.file_name());
        let rustc = env::var_os("RUSTC").unwrap_or_else(|| "rustc".into());
        let output = Command::new(rustc)
            .args(["--edition", "2021", "--crate-type", "cdylib", "--cap-lints", "allow"])
            .arg("--crate-name")
            .arg(self.crate_name)
            .arg("-o")
            .arg(&artifact)
            .arg(&source)
            .output()
            .expect("rustc must be available to build fixture libraries");
        assert!(
            output.status.success(),
            "building {} failed:\n{}",
            self.crate_name,
            String::from_utf8_lossy(&output.stderr)
        );
        artifact
    }

    /// Copies the built artifact into `dir` as `file_name`. Every copy is a separate image once
    /// loaded, with its own statics.
    pub(crate) fn install_as(&self, dir: &Path, file_name: &str) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let target = dir.join(file_name);
        fs::copy(self.artifact(), &target).unwrap();
        target
    }

    /// Path of the built artifact, shared by every test of the binary.
    pub(crate) fn artifact(&self) -> PathBuf {
        built().join(self.file_name())
    }
}

fn built() -> &'static Path {
    static BUILT: OnceLock<TempDir> = OnceLock::new();
    BUILT
        .get_or_init(|| {
            let dir = tempfile::tempdir().unwrap();
            for fixture in ALL {
                fixture.build(dir.path());
            }
            dir
        })
        .path()
}
