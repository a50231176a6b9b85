//! Plan Assist — a chat bot that turns a room description and a task into a
//! numbered action plan.

pub mod bot;
pub mod channels;
pub mod config;
pub mod dialog;
pub mod error;
pub mod llm;
pub mod planner;
