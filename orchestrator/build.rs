use std::fmt::Write as _;
use std::path::{Path, PathBuf};

// Every store-side script embedded with include_str!.
const LUA_DIR: &str = "src/lua";

fn main() {
    let manifest_dir = match std::env::var_os("CARGO_MANIFEST_DIR") {
        Some(value) => PathBuf::from(value),
        None => panic!("CARGO_MANIFEST_DIR is not set for build script"),
    };
    let lua_dir = manifest_dir.join(LUA_DIR);
    println!("cargo:rerun-if-changed={}", lua_dir.display());

    let entries = std::fs::read_dir(&lua_dir).unwrap_or_else(|error| {
        panic!("failed to list Lua scripts in '{}': {error}", lua_dir.display())
    });
    let mut scripts: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "lua"))
        .collect();
    scripts.sort();
    if scripts.is_empty() {
        panic!("no Lua scripts found in '{}'", lua_dir.display());
    }

    for script in &scripts {
        println!("cargo:rerun-if-changed={}", script.display());
        check_script(script);
    }
}

fn check_script(path: &Path) {
    let source = std::fs::read_to_string(path)
        .unwrap_or_else(|error| panic!("failed to read Lua script '{}': {error}", path.display()));

    let parsed = full_moon::parse_fallible(&source, full_moon::LuaVersion::lua51()).into_result();
    if let Err(errors) = parsed {
        let mut details = String::new();
        for error in errors {
            let (start, _) = error.range();
            let _ = writeln!(
                details,
                "line {}, col {}: {}",
                start.line(),
                start.character(),
                error.error_message()
            );
        }
        panic!("invalid Lua syntax in '{}':\n{details}", path.display());
    }

    // Scripts run with EVALSHA and must only touch keys passed in KEYS.
    if !source.contains("KEYS[") {
        panic!(
            "Lua script '{}' does not read any KEYS; store keys must be passed explicitly",
            path.display()
        );
    }
}
