mod admin;
mod harness;
