//! Operand stack for the script VM

use std::fmt;
use std::ops::Deref;

use crate::error::ScriptError;
use crate::num::{cast_to_bool, ScriptNum};
use crate::types::StackItem;

type Result<T> = std::result::Result<T, ScriptError>;

/// Stack: 𝕊*, top at the end
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Stack {
    data: Vec<StackItem>,
}

impl fmt::Display for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, item) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if item.is_empty() {
                write!(f, "<empty>")?;
            } else {
                write!(f, "{}", hex::encode(item))?;
            }
        }
        write!(f, "]")
    }
}

impl Deref for Stack {
    type Target = [StackItem];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl From<Vec<StackItem>> for Stack {
    fn from(data: Vec<StackItem>) -> Self {
        Self { data }
    }
}

impl From<Stack> for Vec<StackItem> {
    fn from(stack: Stack) -> Self {
        stack.data
    }
}

impl Stack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure there are at least `n` elements on the stack.
    #[inline]
    pub fn require(&self, n: usize) -> Result<()> {
        if self.data.len() < n {
            return Err(ScriptError::StackEmpty);
        }
        Ok(())
    }

    #[inline]
    pub fn push(&mut self, item: StackItem) -> &mut Self {
        self.data.push(item);
        self
    }

    #[inline]
    pub fn pop(&mut self) -> Result<StackItem> {
        self.data.pop().ok_or(ScriptError::StackEmpty)
    }

    #[inline]
    pub fn pop_bool(&mut self) -> Result<bool> {
        Ok(cast_to_bool(&self.pop()?))
    }

    #[inline]
    pub fn pop_num(&mut self) -> Result<ScriptNum> {
        Ok(ScriptNum::from_bytes(&self.pop()?))
    }

    /// Pop `n` items, returned bottom-first: [x1 x2 x3] → pop_n(2) = [x2, x3]
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<StackItem>> {
        self.require(n)?;
        Ok(self.data.split_off(self.data.len() - n))
    }

    /// Element `i` places below the top; `top(0)` is the top itself
    #[inline]
    pub fn top(&self, i: usize) -> Result<&StackItem> {
        self.require(i + 1)?;
        Ok(&self.data[self.data.len() - i - 1])
    }

    /// Remove the element `i` places below the top
    pub fn remove(&mut self, i: usize) -> Result<StackItem> {
        self.require(i + 1)?;
        let index = self.data.len() - i - 1;
        Ok(self.data.remove(index))
    }

    pub fn extend(&mut self, items: impl IntoIterator<Item = StackItem>) {
        self.data.extend(items);
    }

    pub fn to_vec(&self) -> Vec<StackItem> {
        self.data.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_empty() {
        let mut stack = Stack::new();
        assert_eq!(stack.pop(), Err(ScriptError::StackEmpty));
        assert_eq!(stack.pop_num(), Err(ScriptError::StackEmpty));
    }

    #[test]
    fn test_top_and_remove() {
        let mut stack = Stack::from(vec![vec![1], vec![2], vec![3]]);
        assert_eq!(stack.top(0).unwrap(), &vec![3]);
        assert_eq!(stack.top(2).unwrap(), &vec![1]);
        assert!(stack.top(3).is_err());

        assert_eq!(stack.remove(1).unwrap(), vec![2]);
        assert_eq!(stack.to_vec(), vec![vec![1], vec![3]]);
    }

    #[test]
    fn test_pop_n_keeps_order() {
        let mut stack = Stack::from(vec![vec![1], vec![2], vec![3]]);
        assert_eq!(stack.pop_n(2).unwrap(), vec![vec![2], vec![3]]);
        assert_eq!(stack.len(), 1);
        assert!(stack.pop_n(2).is_err());
        // failed pop_n leaves the stack alone
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_pop_bool_and_num() {
        let mut stack = Stack::from(vec![vec![0x00, 0x00], vec![0x81]]);
        assert_eq!(stack.pop_num().unwrap(), ScriptNum::from(-1));
        assert!(!stack.pop_bool().unwrap());
    }

    #[test]
    fn test_display() {
        let stack = Stack::from(vec![vec![], vec![0xab, 0x01]]);
        assert_eq!(stack.to_string(), "[<empty>, ab01]");
    }
}
