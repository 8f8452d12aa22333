/// Instruction sent alongside every screenshot
pub const DESCRIBE_PROMPT: &str = r#"You are an intelligent data understanding model. Analyze the following screenshot image and give it a short description about it (in 7 to 10 words max).

Only return the short description, no extra explanation or comments."#;
