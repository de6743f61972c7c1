// The loader binary must be static, non-PIE, and linked at a fixed text
// address that cannot collide with the executable, its interpreter, or the
// mappings described by the load script.
fn main() {
    for arg in &["-static", "-no-pie", "-nostartfiles", "-nodefaultlibs"] {
        println!("cargo:rustc-link-arg-bins={}", arg);
    }

    let ttext = if cfg!(target_arch = "x86_64") {
        "-Wl,-Ttext=0x600000000000"
    } else if cfg!(target_arch = "aarch64") {
        "-Wl,-Ttext=0x2000000000"
    } else if cfg!(target_arch = "arm") {
        "-Wl,-Ttext=0x10000000"
    } else {
        "-Wl,-Ttext=0xa0000000"
    };
    println!("cargo:rustc-link-arg-bins={}", ttext);
}
