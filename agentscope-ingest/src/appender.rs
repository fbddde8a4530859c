//! Step index assignment.
//!
//! A run's step indices are dense and start at 0. The next index is one past
//! the current maximum; a run without steps behaves as if its maximum were -1.
//! Callers must hold the run's append lock (row lock or store mutex) between
//! reading the maximum and inserting the step.

pub fn next_step_index(current_max: Option<i32>) -> i32 {
    current_max.unwrap_or(-1) + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_step_gets_zero() {
        assert_eq!(next_step_index(None), 0);
    }

    #[test]
    fn test_next_index_follows_max() {
        assert_eq!(next_step_index(Some(0)), 1);
        assert_eq!(next_step_index(Some(41)), 42);
    }
}
