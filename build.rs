use std::env;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let target = env::var("TARGET").unwrap();

    // Pass CPU frequency for timing calculations
    println!("cargo:rustc-env=MCU_FREQ_HZ=16000000");
    println!("cargo:rerun-if-changed=build.rs");

    // Host builds only run the hardware-agnostic core and its tests
    if !target.contains("avr") {
        return;
    }

    println!("cargo:rustc-link-arg=-mmcu=atmega128");

    if env::var("PROFILE").unwrap() == "debug" {
        println!("cargo:rustc-cfg=feature=\"debug\"");
    }

    println!("cargo:warning=Building for ATmega128 at 16MHz");
    println!("cargo:warning=Output directory: {}", out_dir.display());
}
