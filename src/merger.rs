//! Linear scan merger.

use std::cmp::Ordering;
use std::marker::PhantomData;

/// State of a single merged input.
enum Head<T> {
    /// Next item hasn't been requested yet.
    Pending,
    /// Next item of the input, the smallest one not yet emitted.
    Ready(T),
    /// Input is exhausted.
    Exhausted,
}

/// Linear scan merger implementation.
/// Merges multiple sorted inputs into a single sorted output holding at most one item per input.
///
/// Every step scans the heads of all inputs in input order and picks the first strictly smallest one,
/// so items the comparator deems equal are emitted in input order. Time complexity is *m* \* *n*
/// where *m* is the number of items, *n* is the number of inputs.
///
/// The first input error aborts the merge: the error is returned and the merger yields nothing afterwards.
pub struct ScanMerger<T, E, F, C>
where
    F: Fn(&T, &T) -> Ordering,
    C: Iterator<Item = Result<T, E>>,
{
    inputs: Vec<C>,
    heads: Vec<Head<T>>,
    compare: F,
    /// Input the last emitted item was taken from. Refilled lazily on the next call
    /// so that an item is handed out before its successor is requested.
    last: Option<usize>,
    initiated: bool,
    failed: bool,

    error_type: PhantomData<E>,
}

impl<T, E, F, C> ScanMerger<T, E, F, C>
where
    F: Fn(&T, &T) -> Ordering,
    C: Iterator<Item = Result<T, E>>,
{
    /// Creates an instance of a scan merger using inputs as sources.
    /// Input items should be sorted in ascending order otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `inputs` - Inputs to be merged in a single sorted one
    /// * `compare` - Function to be used to compare items
    pub fn new<I>(inputs: I, compare: F) -> Self
    where
        I: IntoIterator<Item = C>,
    {
        let inputs = Vec::from_iter(inputs);
        let heads = inputs.iter().map(|_| Head::Pending).collect();

        return ScanMerger {
            inputs,
            heads,
            compare,
            last: None,
            initiated: false,
            failed: false,
            error_type: PhantomData,
        };
    }

    /// Returns the number of merged inputs.
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    fn refill(&mut self, idx: usize) -> Result<(), E> {
        let (head, result) = match self.inputs[idx].next() {
            Some(Ok(item)) => (Head::Ready(item), Ok(())),
            Some(Err(err)) => (Head::Exhausted, Err(err)),
            None => (Head::Exhausted, Ok(())),
        };
        self.heads[idx] = head;

        return result;
    }

    fn select_min(&self) -> Option<usize> {
        let mut min: Option<(usize, &T)> = None;
        for (idx, head) in self.heads.iter().enumerate() {
            if let Head::Ready(item) = head {
                match min {
                    Some((_, min_item)) if (self.compare)(item, min_item) != Ordering::Less => {}
                    _ => min = Some((idx, item)),
                }
            }
        }

        return min.map(|(idx, _)| idx);
    }

    fn advance(&mut self) -> Result<Option<T>, E> {
        if !self.initiated {
            self.initiated = true;
            for idx in 0..self.inputs.len() {
                self.refill(idx)?;
            }
        }

        if let Some(idx) = self.last.take() {
            self.refill(idx)?;
        }

        let item = self.select_min().and_then(|idx| {
            self.last = Some(idx);
            self.take_head(idx)
        });

        return Ok(item);
    }

    fn take_head(&mut self, idx: usize) -> Option<T> {
        match std::mem::replace(&mut self.heads[idx], Head::Pending) {
            Head::Ready(item) => Some(item),
            Head::Pending | Head::Exhausted => None,
        }
    }
}

impl<T, E, F, C> Iterator for ScanMerger<T, E, F, C>
where
    F: Fn(&T, &T) -> Ordering,
    C: Iterator<Item = Result<T, E>>,
{
    type Item = Result<T, E>;

    /// Returns the next item from the inputs in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        match self.advance() {
            Ok(item) => item.map(Ok),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use rstest::*;
    use std::error::Error;
    use std::io::{self, ErrorKind};

    use super::ScanMerger;

    #[rstest]
    #[case(
        vec![],
        vec![],
    )]
    #[case(
        vec![
            vec![],
            vec![]
        ],
        vec![],
    )]
    #[case(
        vec![
            vec![Ok(4), Ok(5), Ok(7)],
            vec![Ok(1), Ok(6)],
            vec![Ok(3)],
            vec![],
        ],
        vec![Ok(1), Ok(3), Ok(4), Ok(5), Ok(6), Ok(7)],
    )]
    #[case(
        vec![
            vec![Ok(1), Ok(3)],
            vec![Ok(2), Ok(5)],
            vec![Ok(4)],
        ],
        vec![Ok(1), Ok(2), Ok(3), Ok(4), Ok(5)],
    )]
    #[case(
        vec![
            vec![Result::Err(io::Error::new(ErrorKind::Other, "test error"))]
        ],
        vec![
            Result::Err(io::Error::new(ErrorKind::Other, "test error"))
        ],
    )]
    #[case(
        vec![
            vec![Ok(3), Result::Err(io::Error::new(ErrorKind::Other, "test error"))],
            vec![Ok(1), Ok(2)],
        ],
        vec![
            Ok(1),
            Ok(2),
            Ok(3),
            Result::Err(io::Error::new(ErrorKind::Other, "test error")),
        ],
    )]
    #[case(
        vec![
            vec![Ok(1), Result::Err(io::Error::new(ErrorKind::Other, "test error")), Ok(2)],
            vec![Ok(3), Ok(4)],
        ],
        vec![
            Ok(1),
            Result::Err(io::Error::new(ErrorKind::Other, "test error")),
        ],
    )]
    fn test_merger(
        #[case] inputs: Vec<Vec<Result<i32, io::Error>>>,
        #[case] expected_result: Vec<Result<i32, io::Error>>,
    ) {
        let merger = ScanMerger::new(inputs.into_iter().map(|input| input.into_iter()), i32::cmp);
        let actual_result = merger.collect();
        assert!(
            compare_vectors_of_result::<_, io::Error>(&actual_result, &expected_result),
            "actual={:?}, expected={:?}",
            actual_result,
            expected_result
        );
    }

    #[test]
    fn test_merger_ties_resolve_to_lowest_input() {
        // items are compared by key only, the second field records the input they came from
        let inputs = vec![
            vec![(1, 'a'), (2, 'a'), (2, 'a')],
            vec![(0, 'b'), (2, 'b')],
            vec![(1, 'c'), (2, 'c')],
        ];
        let merger = ScanMerger::new(
            inputs
                .into_iter()
                .map(|input| input.into_iter().map(Ok::<_, io::Error>)),
            |a: &(i32, char), b: &(i32, char)| a.0.cmp(&b.0),
        );

        let actual: Vec<(i32, char)> = merger.map(Result::unwrap).collect();
        assert_eq!(
            actual,
            vec![(0, 'b'), (1, 'a'), (1, 'c'), (2, 'a'), (2, 'a'), (2, 'b'), (2, 'c')]
        );
    }

    #[test]
    fn test_merger_reversed_order() {
        let inputs = vec![vec![9, 4, 1], vec![8, 7], vec![3]];
        let merger = ScanMerger::new(
            inputs
                .into_iter()
                .map(|input| input.into_iter().map(Ok::<_, io::Error>)),
            |a: &i32, b: &i32| a.cmp(b).reverse(),
        );
        assert_eq!(merger.len(), 3);

        let actual: Vec<i32> = merger.map(Result::unwrap).collect();
        assert_eq!(actual, vec![9, 8, 7, 4, 3, 1]);
    }

    #[test]
    fn test_merger_stays_exhausted() {
        let inputs = vec![vec![2], vec![], vec![1]];
        let mut merger = ScanMerger::new(
            inputs
                .into_iter()
                .map(|input| input.into_iter().map(Ok::<_, io::Error>)),
            i32::cmp,
        );

        assert_eq!(merger.next().unwrap().unwrap(), 1);
        assert_eq!(merger.next().unwrap().unwrap(), 2);
        assert!(merger.next().is_none());
        assert!(merger.next().is_none());
    }

    fn compare_vectors_of_result<T: PartialEq, E: Error + 'static>(
        actual: &Vec<Result<T, E>>,
        expected: &Vec<Result<T, E>>,
    ) -> bool {
        actual.len() == expected.len()
            && actual
                .into_iter()
                .zip(expected)
                .all(
                    |(actual_result, expected_result)| match (actual_result, expected_result) {
                        (Ok(actual_result), Ok(expected_result)) if actual_result == expected_result => true,
                        (Err(actual_err), Err(expected_err)) => actual_err.to_string() == expected_err.to_string(),
                        _ => false,
                    },
                )
    }
}
