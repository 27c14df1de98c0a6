pub mod display_screens;
pub mod schedule_tables;
