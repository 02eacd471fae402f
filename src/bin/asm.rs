use std::env;
use std::fs;
use std::process;

use regvm::assembler;
use regvm::image::ImageFile;
use regvm::logging;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        eprintln!("usage: {} <input.asm> <output.img>", args[0]);
        process::exit(1);
    }

    let assembled = match assembler::assemble_from_file(&args[1]) {
        Ok(assembled) => assembled,
        Err(err) => {
            logging::error(err.to_string());
            process::exit(1);
        }
    };

    let image = ImageFile {
        code_seg: assembled.code_seg,
        stack_top: assembled.stack_top,
        bytes: assembled.bytes,
    };

    if let Err(err) = fs::write(&args[2], image.to_bytes()) {
        logging::error(err.to_string());
        process::exit(1);
    }
}
