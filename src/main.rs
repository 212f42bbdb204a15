use std::fs::File;
use std::io::Write;

use clap::{Arg, ArgAction, Command};
use clap_num::maybe_hex;
use exhume_esfs::{EsFS, FileType};
use prettytable::{Cell, Row, Table};

fn process_partition(
    file_path: &str,
    offset: &u64,
    superblock: &bool,
    label: &bool,
    uuid: &bool,
    list: Option<&String>,
    cat: Option<&String>,
    json: &bool,
    verbose: &bool,
) {
    let body = match File::open(file_path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("Could not open '{}': {}", file_path, err);
            std::process::exit(1);
        }
    };

    let mut filesystem = match EsFS::new(body, *offset) {
        Ok(fs) => fs,
        Err(message) => {
            eprintln!("EsFS object creation error: {}", message);
            std::process::exit(1);
        }
    };

    if *verbose {
        println!("EsFS created successfully.");
    }

    if *superblock {
        if *json {
            println!(
                "{}",
                serde_json::to_string_pretty(&filesystem.superblock.to_json()).unwrap()
            );
        } else {
            println!("{}", filesystem.superblock.to_table());
        }
    }

    if *label {
        println!("{}", filesystem.label());
    }

    if *uuid {
        println!("{}", filesystem.uuid());
    }

    if let Some(path) = list {
        let records = match filesystem.list_dir(path) {
            Ok(records) => records,
            Err(err) => {
                eprintln!("{}", err);
                std::process::exit(1);
            }
        };
        if *json {
            let json_array: Vec<_> = records
                .iter()
                .map(|record| record.node.entry.to_json())
                .collect();
            println!("{}", serde_json::to_string_pretty(&json_array).unwrap());
        } else {
            let mut table = Table::new();
            table.add_row(Row::new(vec![
                Cell::new("Name"),
                Cell::new("Type"),
                Cell::new("Size"),
                Cell::new("Modified"),
            ]));
            for record in &records {
                let ftype = match record.file_type {
                    FileType::Directory => "dir",
                    FileType::Regular => "file",
                };
                table.add_row(Row::new(vec![
                    Cell::new(&record.name),
                    Cell::new(ftype),
                    Cell::new(&format!("{}", record.node.entry.file_size)),
                    Cell::new(&exhume_esfs::direntry::format_time(
                        record.node.entry.modification_time,
                    )),
                ]));
            }
            println!("{}", table.to_string());
        }
    }

    if let Some(path) = cat {
        let mut file = match filesystem.open(path) {
            Ok(file) => file,
            Err(err) => {
                eprintln!("{}", err);
                std::process::exit(1);
            }
        };
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = match filesystem.read(&mut file, &mut buf) {
                Ok(n) => n,
                Err(err) => {
                    eprintln!("{}", err);
                    std::process::exit(1);
                }
            };
            if n == 0 {
                break;
            }
            if out.write_all(&buf[..n]).is_err() {
                std::process::exit(1);
            }
        }
    }
}

fn main() {
    let matches = Command::new("exhume_esfs")
        .version("0.1")
        .author("ForensicXlab")
        .about("Exhume files and metadata from an ESFS partition.")
        .arg(
            Arg::new("body")
                .short('b')
                .long("body")
                .value_parser(clap::value_parser!(String))
                .required(true)
                .help("The path to the body to exhume."),
        )
        .arg(
            Arg::new("offset")
                .short('o')
                .long("offset")
                .value_parser(maybe_hex::<u64>)
                .required(false)
                .help("The esfs partition starts at address 0x...."),
        )
        .arg(
            Arg::new("superblock")
                .short('s')
                .long("superblock")
                .action(ArgAction::SetTrue)
                .help("Display the superblock information."),
        )
        .arg(
            Arg::new("label")
                .long("label")
                .action(ArgAction::SetTrue)
                .help("Display the volume label."),
        )
        .arg(
            Arg::new("uuid")
                .long("uuid")
                .action(ArgAction::SetTrue)
                .help("Display the volume UUID."),
        )
        .arg(
            Arg::new("list")
                .short('l')
                .long("list")
                .value_parser(clap::value_parser!(String))
                .required(false)
                .help("List the directory at the given path."),
        )
        .arg(
            Arg::new("cat")
                .short('c')
                .long("cat")
                .value_parser(clap::value_parser!(String))
                .required(false)
                .help("Write the file at the given path to stdout."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .short('j')
                .long("json")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let file_path = matches.get_one::<String>("body").unwrap();
    let offset = match matches.get_one::<u64>("offset") {
        Some(offset) => offset,
        None => &0u64,
    };
    let superblock = match matches.get_one::<bool>("superblock") {
        Some(superblock) => superblock,
        None => &false,
    };
    let label = match matches.get_one::<bool>("label") {
        Some(label) => label,
        None => &false,
    };
    let uuid = match matches.get_one::<bool>("uuid") {
        Some(uuid) => uuid,
        None => &false,
    };
    let list = matches.get_one::<String>("list");
    let cat = matches.get_one::<String>("cat");
    let verbose = match matches.get_one::<bool>("verbose") {
        Some(verbose) => verbose,
        None => &false,
    };
    let json = match matches.get_one::<bool>("json") {
        Some(json) => json,
        None => &false,
    };

    process_partition(
        file_path, offset, superblock, label, uuid, list, cat, json, verbose,
    );
}
