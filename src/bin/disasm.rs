use std::env;
use std::fs;
use std::process;

use regvm::disassembler;
use regvm::image::ImageFile;
use regvm::logging;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("usage: {} <image>", args[0]);
        process::exit(1);
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

    print!("{}", disassembler::disassemble_data(&image.bytes, image.code_seg));
    print!(
        "{}",
        disassembler::disassemble(&image.bytes, image.code_seg, image.stack_top)
    );
}
