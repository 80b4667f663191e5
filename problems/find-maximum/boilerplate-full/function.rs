use std::io::Read;

##USER_CODE_HERE##

fn main() {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input).unwrap();
    let values: Vec<i64> = input
        .split_whitespace()
        .map(|token| token.parse().unwrap())
        .collect();
    if values.is_empty() {
        eprintln!("no input values");
        std::process::exit(1);
    }
    println!("{}", find_max(&values));
}
