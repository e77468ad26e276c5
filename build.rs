use pb_rs::{types::FileDescriptor, ConfigBuilder};
use std::{env, fs, path::PathBuf};

fn main() {
    let out_dir: PathBuf = PathBuf::from(env::var("OUT_DIR").unwrap()).join("proto");
    let in_dir: PathBuf = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap()).join("proto");

    let protos: Vec<PathBuf> = ["osmdata.proto", "osmformat.proto"]
        .iter()
        .map(|name| {
            // Tell Cargo when to rebuild
            println!("cargo:rerun-if-changed={}", in_dir.join(name).display());
            in_dir.join(name)
        })
        .collect();

    if fs::metadata(&out_dir).is_ok() {
        fs::remove_dir_all(&out_dir).unwrap();
    }
    fs::create_dir_all(&out_dir).unwrap();

    let config = ConfigBuilder::new(&protos, None, Some(&out_dir), &[in_dir])
        .expect("could not generate pb-rs config");
    FileDescriptor::run(&config.build()).expect("could not generate proto files");
}
