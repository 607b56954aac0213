use std::{env, path::PathBuf};

fn main() -> Result<(), env::VarError> {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR")?);
    let ld = manifest_dir.join("linker.ld");
    println!("cargo:rerun-if-changed={}", ld.display());
    println!("cargo:rustc-link-arg-bins=-T{}", ld.display());
    Ok(())
}
