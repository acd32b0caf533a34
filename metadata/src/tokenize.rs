/// Splits a path into lowercase keyword tokens on common path/filename
/// punctuation, matching how `search_files` tokenises its query.
pub fn tokenize_path(path: &str) -> Vec<String> {
    path.split(|c: char| c == '/' || c == '.' || c == '_' || c == '-' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_path_punctuation() {
        let tokens = tokenize_path("/var/Log/App-Server_1.log");
        assert_eq!(tokens, vec!["var", "log", "app", "server", "1", "log"]);
    }
}
