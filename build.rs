use std::env;
use std::process::Command;

const CSS_INPUT: &str = "static/css/input.css";
const CSS_OUTPUT: &str = "static/css/dist/output.css";

// Compiles the console stylesheet. Askama templates are checked by rustc, the
// stylesheet only needs tailwind; a missing toolchain is a warning, not a
// build failure.
fn main() {
    println!("cargo:rerun-if-changed={CSS_INPUT}");
    println!("cargo:rerun-if-changed=templates/");
    println!("cargo:rerun-if-changed=static/js/");
    println!("cargo:rerun-if-env-changed=DOCKEROPS_SKIP_CSS");

    if env::var_os("DOCKEROPS_SKIP_CSS").is_some() {
        return;
    }

    let status = Command::new("npx")
        .args(["@tailwindcss/cli", "-i", CSS_INPUT, "-o", CSS_OUTPUT, "--minify"])
        .status();

    match status {
        Ok(s) if s.success() => {}
        Ok(s) => println!("cargo:warning=tailwind exited with {s}; {CSS_OUTPUT} not rebuilt"),
        Err(e) => println!("cargo:warning=could not run tailwind ({e}); {CSS_OUTPUT} not rebuilt"),
    }
}
