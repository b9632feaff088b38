//! The aviary-client executable supports the following subcommands:
//!
//! `aviary-client add <NAME> <COLOR> <WEIGHT> <HEIGHT> [--addr IP-PORT]`
//!
//!     Add a new bird. Fails if a bird with that name already exists.
//!
//! `aviary-client remove <NAME> [--addr IP-PORT]`
//!
//!     Remove a bird and all of its sightings.
//!
//! `aviary-client add-sighting <NAME> <LOCATION> <DATE> [--addr IP-PORT]`
//!
//!     Record a sighting of a known bird. DATE has the format
//!     "YYYY-MM-DD HH:MM:SS" and is interpreted as UTC.
//!
//! `aviary-client list [--addr IP-PORT]`
//!
//!     List all birds, sorted by name.
//!
//! `aviary-client list-sightings <PATTERN> <START> <END> [--addr IP-PORT]`
//!
//!     List sightings of every bird whose name fully matches PATTERN as a
//!     regular expression, between the START and END dates inclusive.
//!
//! `aviary-client quit [--addr IP-PORT]`
//!
//!     Stop the server gracefully.
//!
//! --addr accepts an IP address and port with the format IP:PORT. If --addr
//! is not specified then connect on 127.0.0.1:4000.

use std::net::SocketAddr;
use std::process::exit;

use aviary::{AviaryClient, AviaryError, Request, Response, Result, ResultData};
use chrono::{DateTime, NaiveDateTime};
use clap::{crate_version, App, Arg, ArgMatches, SubCommand};

const DEFAULT_ADDRESS: &str = "127.0.0.1:4000";
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    /// the server's ip:port
    addr: SocketAddr,
    req: Request,
}

impl Opt {
    fn build(addr: &str, req: Request) -> Result<Opt> {
        let addr: SocketAddr = addr.parse().map_err(|_| {
            AviaryError::Config(format!(
                "could not parse {} into an IP address and port",
                addr
            ))
        })?;
        Ok(Opt { addr, req })
    }
}

fn main() {
    let matches = App::new("aviary-client")
        .version(crate_version!())
        .about("command line client for the aviary bird observation store")
        .subcommands(vec![
            SubCommand::with_name("add")
                .about("Add a new bird")
                .arg(Arg::with_name("NAME").required(true).index(1))
                .arg(Arg::with_name("COLOR").required(true).index(2))
                .arg(Arg::with_name("WEIGHT").required(true).index(3))
                .arg(Arg::with_name("HEIGHT").required(true).index(4)),
            SubCommand::with_name("remove")
                .about("Remove a bird and all of its sightings")
                .arg(Arg::with_name("NAME").required(true).index(1)),
            SubCommand::with_name("add-sighting")
                .about("Record a sighting of a known bird")
                .arg(Arg::with_name("NAME").required(true).index(1))
                .arg(Arg::with_name("LOCATION").required(true).index(2))
                .arg(Arg::with_name("DATE").required(true).index(3)),
            SubCommand::with_name("list").about("List all birds"),
            SubCommand::with_name("list-sightings")
                .about("List sightings matching a name pattern and time range")
                .arg(Arg::with_name("PATTERN").required(true).index(1))
                .arg(Arg::with_name("START").required(true).index(2))
                .arg(Arg::with_name("END").required(true).index(3)),
            SubCommand::with_name("quit").about("Stop the server"),
        ])
        .arg(
            Arg::with_name("addr")
                .long("addr")
                .value_name("IP_ADDR:PORT")
                .help("sets the IP_ADDR:PORT of the server to connect to")
                .default_value(DEFAULT_ADDRESS)
                .global(true),
        )
        .get_matches();

    let result = parse_options(matches).and_then(run);
    if let Err(e) = result {
        eprintln!("{}", e);
        exit(1);
    }
}

/// executes the request and renders the server's answer
fn run(opt: Opt) -> Result<()> {
    let mut client = AviaryClient::connect(opt.addr)?;
    let response = client.execute(&opt.req)?;
    if !response.success {
        eprintln!(
            "server answered with an error: {}",
            response.error.unwrap_or_else(|| "unknown".to_owned())
        );
        exit(1);
    }
    render(&opt.req, response);
    Ok(())
}

/// prints the results of a successful request
fn render(req: &Request, response: Response) {
    match req {
        Request::Add { name, .. } => println!("bird {} added successfully", name),
        Request::Remove { name } => println!("bird {} successfully removed", name),
        Request::AddSight { name, .. } => {
            println!("sighting successfully added to bird {}", name)
        }
        Request::List => match response.result {
            Some(ResultData::Birds(birds)) => {
                println!("number of found objects: {}", birds.len());
                for bird in birds {
                    println!(
                        "name={} color={} height={} weight={}",
                        bird.name, bird.color, bird.height, bird.weight
                    );
                }
            }
            _ => println!("number of found objects: 0"),
        },
        Request::ListSights { .. } => match response.result {
            Some(ResultData::Sightings(sightings)) => {
                println!("number of found objects: {}", sightings.len());
                for sighting in sightings {
                    println!(
                        "name={} location={} date={}",
                        sighting.name,
                        sighting.location,
                        format_date(sighting.timestamp)
                    );
                }
            }
            _ => println!("number of found objects: 0"),
        },
        Request::Quit => println!("server successfully stopped"),
    }
}

/// parses the matches from the command line into an [`Opt`] struct
fn parse_options(matches: ArgMatches) -> Result<Opt> {
    let addr = matches.value_of("addr").unwrap();
    match matches.subcommand() {
        ("add", Some(args)) => {
            let name = args.value_of("NAME").map(String::from).unwrap();
            let color = args.value_of("COLOR").map(String::from).unwrap();
            let weight = parse_float(args.value_of("WEIGHT").unwrap())?;
            let height = parse_float(args.value_of("HEIGHT").unwrap())?;
            Opt::build(
                addr,
                Request::Add {
                    name,
                    color,
                    weight,
                    height,
                },
            )
        }
        ("remove", Some(args)) => {
            let name = args.value_of("NAME").map(String::from).unwrap();
            Opt::build(addr, Request::Remove { name })
        }
        ("add-sighting", Some(args)) => {
            let name = args.value_of("NAME").map(String::from).unwrap();
            let location = args.value_of("LOCATION").map(String::from).unwrap();
            let timestamp = parse_date(args.value_of("DATE").unwrap())?;
            Opt::build(
                addr,
                Request::AddSight {
                    name,
                    location,
                    timestamp,
                },
            )
        }
        ("list", Some(_)) => Opt::build(addr, Request::List),
        ("list-sightings", Some(args)) => {
            let name = args.value_of("PATTERN").map(String::from).unwrap();
            let start = parse_date(args.value_of("START").unwrap())?;
            let end = parse_date(args.value_of("END").unwrap())?;
            Opt::build(addr, Request::ListSights { name, start, end })
        }
        ("quit", Some(_)) => Opt::build(addr, Request::Quit),
        _ => Err(AviaryError::Config(
            "unknown command, see --help for the list of commands".to_owned(),
        )),
    }
}

fn parse_float(value: &str) -> Result<f64> {
    value
        .parse()
        .map_err(|_| AviaryError::Config(format!("could not parse {} as a number", value)))
}

/// parses a "YYYY-MM-DD HH:MM:SS" date into epoch milliseconds (UTC)
fn parse_date(value: &str) -> Result<i64> {
    NaiveDateTime::parse_from_str(value, DATE_FORMAT)
        .map(|date| date.and_utc().timestamp_millis())
        .map_err(|_| {
            AviaryError::Config(format!(
                "could not parse {} as a date, expected the format YYYY-MM-DD HH:MM:SS",
                value
            ))
        })
}

/// renders epoch milliseconds back into the date format used for input
fn format_date(millis: i64) -> String {
    match DateTime::from_timestamp_millis(millis) {
        Some(date) => date.format(DATE_FORMAT).to_string(),
        None => millis.to_string(),
    }
}
