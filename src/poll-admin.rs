//! A small operator tool for poll questions.
//!
//! Questions are described by JSON spec files:
//! `{ "text", "publish_at", "end_at"?, "choices": [..] }`.
//! `check` validates a spec offline; `add` validates it and inserts it into
//! MongoDB, using the same validation as the server.

use std::fs::File;
use std::io::BufReader;

use chrono::{DateTime, Utc};
use clap::{Arg, ArgAction, ArgMatches, Command};
use rocket::serde::json::serde_json;

use polls_backend::{
    config::connect,
    model::{
        api::{QuestionSpec, SpecError},
        common::{Eligibility, QuestionId},
        db::NewPoll,
    },
    store::{MongoStore, PollStore},
};

const PROGRAM_NAME: &str = "poll-admin";

const ABOUT_TEXT: &str = "Validate and add poll questions.

EXIT CODES:
     0: Success.
   255: Ran successfully, but the question spec is invalid.
 Other: Error.";

const SPEC_PATH: &str = "SPEC_PATH";
const AT: &str = "at";
const DB_URI: &str = "db-uri";
const DB_NAME: &str = "db-name";

const SPEC_PATH_HELP: &str = "The path to a JSON question spec,\n\
of the form `{\"text\", \"publish_at\", \"end_at\", \"choices\"}`";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    let spec_path = Arg::new(SPEC_PATH)
        .help(SPEC_PATH_HELP)
        .action(ArgAction::Set)
        .required(true);

    clap::command!(PROGRAM_NAME)
        .about(ABOUT_TEXT)
        .subcommand_required(true)
        .subcommand(
            Command::new("check")
                .about("Validate a question spec and report its voting state")
                .arg(spec_path.clone())
                .arg(
                    Arg::new(AT)
                        .long(AT)
                        .help("Evaluate the voting state at this RFC 3339 time instead of now")
                        .action(ArgAction::Set),
                ),
        )
        .subcommand(
            Command::new("add")
                .about("Validate a question spec and insert it into the database")
                .arg(spec_path)
                .arg(
                    Arg::new(DB_URI)
                        .long(DB_URI)
                        .help("MongoDB connection string")
                        .action(ArgAction::Set)
                        .required(true),
                )
                .arg(
                    Arg::new(DB_NAME)
                        .long(DB_NAME)
                        .help("Database name")
                        .action(ArgAction::Set)
                        .default_value("polls"),
                ),
        )
}

/// Errors that this program may produce.
#[derive(Debug, PartialEq)]
enum Error {
    /// IO error described by the inner message.
    IO(String),
    /// Failed to decode the spec or an argument.
    Format(String),
    /// The spec decoded, but describes an invalid question.
    Invalid(SpecError),
    /// Database error described by the inner message.
    Db(String),
}

/// Load and validate a question spec.
fn load(path: &str) -> Result<NewPoll, Error> {
    let file = BufReader::new(File::open(path).map_err(|e| Error::IO(e.to_string()))?);
    let spec: QuestionSpec =
        serde_json::from_reader(file).map_err(|e| Error::Format(e.to_string()))?;
    spec.try_into().map_err(Error::Invalid)
}

fn parse_time(at: Option<&String>) -> Result<DateTime<Utc>, Error> {
    match at {
        Some(at) => DateTime::parse_from_rfc3339(at)
            .map(|at| at.with_timezone(&Utc))
            .map_err(|e| Error::Format(format!("`--at {at}`: {e}"))),
        None => Ok(Utc::now()),
    }
}

/// Validate a spec and evaluate its voting state at `at`.
fn check(path: &str, at: DateTime<Utc>) -> Result<(NewPoll, Eligibility), Error> {
    let poll = load(path)?;
    let eligibility = poll.question.eligibility(at);
    Ok((poll, eligibility))
}

/// Validate a spec and insert it.
async fn add(path: &str, db_uri: &str, db_name: &str) -> Result<QuestionId, Error> {
    let poll = load(path)?;
    let (client, db) = connect(db_uri, db_name)
        .await
        .map_err(|e| Error::Db(e.to_string()))?;
    MongoStore::new(client, db)
        .insert_question(poll)
        .await
        .map_err(|e| Error::Db(e.to_string()))
}

/// Run the chosen subcommand, report the result, and return the exit code.
fn run(args: &ArgMatches) -> u8 {
    let result = match args.subcommand() {
        Some(("check", args)) => {
            // Required argument is guaranteed to be present.
            let path: &String = args.get_one(SPEC_PATH).unwrap();
            parse_time(args.get_one(AT)).and_then(|at| {
                check(path, at).map(|(poll, eligibility)| {
                    println!("Question spec is valid.");
                    println!("{}", poll.question.text);
                    for choice in &poll.choices {
                        println!("  - {choice}");
                    }
                    println!("Voting state at {}: {}", at.to_rfc3339(), describe(eligibility));
                })
            })
        }
        Some(("add", args)) => {
            let path: &String = args.get_one(SPEC_PATH).unwrap();
            let db_uri: &String = args.get_one(DB_URI).unwrap();
            // Has a default.
            let db_name: &String = args.get_one(DB_NAME).unwrap();
            match rocket::tokio::runtime::Runtime::new() {
                Ok(runtime) => runtime
                    .block_on(add(path, db_uri, db_name))
                    .map(|id| println!("Added question {id}")),
                Err(e) => Err(Error::IO(e.to_string())),
            }
        }
        // `subcommand_required` rules this out.
        _ => unreachable!(),
    };

    match result {
        Ok(()) => 0,
        Err(Error::IO(msg)) => {
            println!("IO error: {msg}");
            1
        }
        Err(Error::Format(msg)) => {
            println!("Invalid JSON: {msg}");
            1
        }
        Err(Error::Db(msg)) => {
            println!("Database error: {msg}");
            1
        }
        Err(Error::Invalid(err)) => {
            println!("Invalid question spec: {err}");
            255
        }
    }
}

fn describe(eligibility: Eligibility) -> &'static str {
    match eligibility {
        Eligibility::NotYetPublished => "not yet published",
        Eligibility::OpenForVoting => "open for voting",
        Eligibility::Closed => "closed",
    }
}

fn main() {
    let args = cli().get_matches();
    let exit_code = run(&args);
    std::process::exit(exit_code.into())
}
