use crate::invoker::{Submission, SubmissionError};

/// The inputs every run feeds to the submission, in order.
pub const FIXED_INPUTS: [&str; 2] = ["input-1", "input-2"];

pub fn fixed_inputs() -> Vec<String> {
    FIXED_INPUTS.iter().map(|input| input.to_string()).collect()
}

/// The bundled submission: returns its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoSubmission;

impl Submission for EchoSubmission {
    type Input = String;
    type Output = String;

    fn call(&self, input: &String) -> Result<String, SubmissionError> {
        Ok(echo(input))
    }
}

pub fn echo(content: &str) -> String {
    content.to_string()
}
