use pdfq::parser::Parser;
use pdfq::query;
use pdfq::tokenizer::Lexer;

const RED: &str = "\x1b[4;31m";
const NORMAL: &str = "\x1b[0;0m";

enum Cmd {
    None,
    List,
    Query(String),
}

fn usage(progname: &str) {
    print!(
        "{prog} usage:
{prog} -f <filepath> cmd
  -f <filepath>     Indicates where the PDF file is
  cmd               The command you want to execute
    -list           List the indexed text in the PDF file
    -query '<expr>' Run a query over the indexed text
      @  set the cursor:
         \"text\"  match the fragment text
         #123    jump to the absolute index
      +N advance the cursor by N
      [K ... ] print K fragments per line until the condition inside is met
  EXAMPLE:
    {prog} -f myfile.pdf -query '@\"COMPANY\"[6 @#100]'
      print 6 fragments per line, starting after \"COMPANY\", stopping at index 100.
",
        prog = progname
    );
}

fn unknown_flag(progname: &str, args: &[String], bad: usize) {
    eprint!("{}", progname);
    let mut spaces = progname.len();
    for (j, arg) in args.iter().enumerate().skip(1) {
        if j == bad {
            eprint!(" {}{}{}", RED, arg, NORMAL);
        } else {
            eprint!(" {}", arg);
        }
        if j < bad {
            spaces += arg.len() + 1;
        }
    }
    eprintln!();
    eprintln!("{}{}^^^{}", " ".repeat(spaces + 1), RED, NORMAL);
    eprintln!("Unknown option {}", args[bad]);
    usage(progname);
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let progname = args
        .first()
        .map(|p| p.rsplit('/').next().unwrap_or(p).to_string())
        .unwrap_or_else(|| "pdfq".to_string());

    let mut files: Vec<String> = Vec::new();
    let mut cmd = Cmd::None;
    let mut prev_flag = "";
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-f" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Missing value for {}-f{}", RED, NORMAL);
                    usage(&progname);
                    std::process::exit(1);
                }
                files.push(args[i].clone());
                prev_flag = "-f";
            }
            "-list" => {
                cmd = Cmd::List;
                prev_flag = "-list";
            }
            "-query" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("ERROR missing query");
                    usage(&progname);
                    std::process::exit(1);
                }
                cmd = Cmd::Query(args[i].clone());
                prev_flag = "-query";
            }
            "-h" | "-help" | "--help" => {
                usage(&progname);
                std::process::exit(0);
            }
            arg => {
                // bare paths may follow -f; anything else is unknown
                if prev_flag == "-f" && !arg.starts_with('-') {
                    files.push(arg.to_string());
                } else {
                    unknown_flag(&progname, &args, i);
                    std::process::exit(1);
                }
            }
        }
        i += 1;
    }

    if files.is_empty() {
        eprintln!("Missing {}-f <filepath>{}", RED, NORMAL);
        usage(&progname);
        std::process::exit(1);
    }

    for path in &files {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                eprintln!("failed to read {}: {}", path, err);
                std::process::exit(1);
            }
        };
        let doc = match Parser::new(Lexer::new(&bytes)).parse() {
            Ok(doc) => doc,
            Err(err) => {
                eprintln!("failed to parse {}: {}", path, err);
                std::process::exit(1);
            }
        };

        match &cmd {
            Cmd::List => {
                for (index, fragment) in doc.text.iter().enumerate() {
                    println!("{:4}: [{}]", index, fragment);
                }
            }
            Cmd::Query(expr) => {
                let program = match query::compile(expr) {
                    Ok(program) => program,
                    Err(err) => {
                        eprintln!("{}", err);
                        std::process::exit(1);
                    }
                };
                match query::run(&program, &doc.text) {
                    Ok(rows) => {
                        for row in rows {
                            println!("{}", row.join("\t"));
                        }
                    }
                    Err(err) => {
                        eprintln!("{}", err);
                        std::process::exit(1);
                    }
                }
            }
            Cmd::None => {
                eprintln!("Missing {}<cmd>{}", RED, NORMAL);
                usage(&progname);
                std::process::exit(1);
            }
        }
    }
}
