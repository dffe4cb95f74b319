use std::env;
use std::process;
use std::time::Instant;

use tracing_subscriber::EnvFilter;

use termula::context::StatisticalModel;
use termula::data::{Column, ColumnTable};
use termula::schema::{schema, Hints};
use termula::{apply_schema, model_cols, Formula};

fn demo_table() -> termula::Result<ColumnTable> {
    Ok(ColumnTable::from_columns(vec![
        ("y", Column::from(vec![1.2, 2.3, 2.9, 4.1, 5.2, 5.8])),
        ("x", Column::from(vec![0.5, 1.0, 1.5, 2.0, 2.5, 3.0])),
        ("a", Column::from(vec!["p", "q", "p", "q", "p", "q"])),
        ("b", Column::from(vec!["r", "r", "s", "s", "t", "t"])),
    ])?)
}

fn run(src: &str) -> termula::Result<()> {
    let data = demo_table()?;

    let now = Instant::now();
    eprintln!("Parsing the formula {}", src);
    let formula = Formula::parse(src)?;
    eprintln!("{} us. Terms: {}", now.elapsed().as_micros(), formula);

    let now = Instant::now();
    let schema = schema(&formula.to_term(), &data, &Hints::new())?;
    let resolved = apply_schema(&formula, &schema, &StatisticalModel)?;
    eprintln!("{} us. Resolved: {}", now.elapsed().as_micros(), resolved);

    let now = Instant::now();
    let (response, mm) = model_cols(&resolved, &data)?;
    eprintln!("{} us. Model matrix {:?}", now.elapsed().as_micros(), mm.matrix.dim());

    println!("{}", mm.coefnames.join("\t"));
    for (y, row) in response.iter().zip(mm.matrix.rows()) {
        let cells: Vec<String> = row.iter().map(|v| format!("{:.4}", v)).collect();
        println!("{}\t| {}", y, cells.join("\t"));
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let src = if args.is_empty() {
        "y ~ 1 + a * b + log(x)".to_string()
    } else {
        args.join(" ")
    };
    if let Err(e) = run(&src) {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}
