//! Deterministic branch names. Re-running a workflow for the same issue and
//! phase always lands on the same branch.

/// Prefix shared by every implementation branch of an issue.
pub fn feature_branch_prefix(issue_number: u64) -> String {
    format!("feature/issue-{issue_number}")
}

/// Implementation branch for an issue, or for one phase of it.
pub fn feature_branch(issue_number: u64, phase: Option<u32>) -> String {
    match phase {
        Some(order) => format!("{}-phase-{order}", feature_branch_prefix(issue_number)),
        None => feature_branch_prefix(issue_number),
    }
}

/// Branch phase `order` is cut from: the previous phase's branch, or the
/// default branch for the first phase.
pub fn phase_base_branch(issue_number: u64, order: u32, default_branch: &str) -> String {
    if order <= 1 {
        default_branch.to_string()
    } else {
        feature_branch(issue_number, Some(order - 1))
    }
}

/// Branch carrying the design documents of an issue.
pub fn docs_branch(issue_number: u64) -> String {
    format!("docs/issue-{issue_number}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_names_are_deterministic() {
        assert_eq!(feature_branch(42, None), "feature/issue-42");
        assert_eq!(feature_branch(42, Some(3)), "feature/issue-42-phase-3");
        assert_eq!(feature_branch(42, Some(3)), feature_branch(42, Some(3)));
        assert_eq!(docs_branch(7), "docs/issue-7");
    }

    #[test]
    fn test_phase_branches_stack() {
        assert_eq!(phase_base_branch(42, 1, "main"), "main");
        assert_eq!(phase_base_branch(42, 2, "main"), "feature/issue-42-phase-1");
        assert!(feature_branch(42, Some(2)).starts_with(&feature_branch_prefix(42)));
    }
}
