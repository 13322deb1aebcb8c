//! Build script for alpaca.
//!
//! Without the `native` feature nothing is linked and the crate runs against
//! the GGUF metadata stub. With it, a pre-built llama.cpp shared library is
//! linked. The library is located through `LLAMA_CPP_LIB_DIR`, falling back
//! to `llama.cpp/build/bin` next to the manifest (the layout produced by
//! `cmake -B build && cmake --build build` in a llama.cpp checkout). The
//! checkout must be at release tag `b5200`, the `llama.h` the declarations
//! in `src/bindings/sys.rs` are written against.

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=LLAMA_CPP_LIB_DIR");

    #[cfg(feature = "native")]
    link_llama();
}

#[cfg(feature = "native")]
fn link_llama() {
    use std::path::PathBuf;

    let lib_dir = match std::env::var("LLAMA_CPP_LIB_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => {
            let manifest_dir = std::env::var("CARGO_MANIFEST_DIR")
                .map(PathBuf::from)
                .unwrap_or_default();
            manifest_dir.join("llama.cpp").join("build").join("bin")
        }
    };

    if !lib_dir.exists() {
        println!(
            "cargo:warning=llama.cpp library directory {} does not exist; set LLAMA_CPP_LIB_DIR",
            lib_dir.display()
        );
    }

    println!("cargo:rustc-link-search=native={}", lib_dir.display());
    println!("cargo:rustc-link-lib=dylib=llama");

    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    match target_os.as_str() {
        "macos" | "ios" => {
            println!("cargo:rustc-link-lib=dylib=c++");
            for framework in ["Accelerate", "Foundation", "Metal", "MetalKit"] {
                println!("cargo:rustc-link-lib=framework={framework}");
            }
        }
        "windows" => {}
        _ => {
            println!("cargo:rustc-link-lib=dylib=stdc++");
            println!("cargo:rustc-link-lib=dylib=m");
        }
    }
}
