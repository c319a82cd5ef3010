pub mod activity;
pub mod booking;
pub mod discussion;
pub mod forum;
pub mod notice;
pub mod rating;
pub mod science;
pub mod user;
