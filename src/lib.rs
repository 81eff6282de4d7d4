pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod polls;
pub mod sse;
pub mod startup;
pub mod validation;
pub mod vote_service;
pub mod votes;
