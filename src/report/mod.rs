pub mod composer;
pub mod mailer;
pub mod renderer;
