// Copyright 2025-2026 CEMAXECUTER LLC

fn main() {
    #[cfg(feature = "hackrf")]
    {
        println!("cargo:rustc-link-lib=hackrf");
    }
}
