use std::env;
use std::path::Path;

fn main() {
    println!("cargo:rerun-if-env-changed=XILINX_XRT");
    println!("cargo:rerun-if-env-changed=OPENCL_LIB_DIR");

    // The software device needs no vendor libraries.
    if env::var_os("CARGO_FEATURE_OPENCL").is_none() {
        return;
    }

    let xrt_root = env::var("XILINX_XRT").unwrap_or_else(|_| "/opt/xilinx/xrt".to_string());
    let xrt_lib = format!("{}/lib", xrt_root);
    if !Path::new(&xrt_lib).exists() {
        println!(
            "cargo:warning=XRT libraries not found at {}. Set XILINX_XRT to the XRT install.",
            xrt_lib
        );
    }
    println!("cargo:rustc-link-search=native={}", xrt_lib);

    // ICD loader may live outside the XRT tree; opencl3 links it.
    if let Ok(dir) = env::var("OPENCL_LIB_DIR") {
        println!("cargo:rustc-link-search=native={}", dir);
    }

    println!("cargo:rustc-link-lib=dylib=xilinxopencl");
    println!("cargo:rustc-link-lib=dylib=xrt_core");
}
