use std::env;
use std::fs;
use std::io;
use std::process;

use regvm::image::ImageFile;
use regvm::logging;
use regvm::vm;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("usage: {} <image>", args[0]);
        // Matches the reference interpreter's own exit(0) on bad argv,
        // distinct from the non-zero status used for assembly/runtime
        // errors below.
        process::exit(0);
    }

    let data = match fs::read(&args[1]) {
        Ok(data) => data,
        Err(err) => {
            logging::error(err.to_string());
            process::exit(1);
        }
    };

    let image = match ImageFile::from_bytes(&data) {
        Ok(image) => image,
        Err(err) => {
            logging::error(err.to_string());
            process::exit(1);
        }
    };

    let stdin = io::stdin();
    let stdout = io::stdout();
    let result = vm::run_image(
        &image.bytes,
        image.code_seg,
        image.stack_top,
        stdin.lock(),
        stdout.lock(),
    );

    if let Err(err) = result {
        logging::error(err.to_string());
        process::exit(1);
    }
}
