//! Dichotomous response matrix construction.
//!
//! Rows are students, columns are items, entries are 1 (correct) or 0
//! (incorrect). There is no missing-value code: callers resolve absent
//! answers to 0 before building the matrix.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::MatrixError;

/// One student's answer sheet, items in the same order for every student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub id: String,
    pub responses: Vec<bool>,
}

impl StudentRecord {
    pub fn new(id: impl Into<String>, responses: Vec<bool>) -> Self {
        Self {
            id: id.into(),
            responses,
        }
    }

    /// Build a record from 0/1 integers.
    pub fn from_binary(id: impl Into<String>, responses: &[i32]) -> Result<Self, MatrixError> {
        let responses = responses
            .iter()
            .enumerate()
            .map(|(j, &r)| match r {
                0 => Ok(false),
                1 => Ok(true),
                other => Err(MatrixError::InvalidValue {
                    row: 0,
                    col: j,
                    value: other as i64,
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(id, responses))
    }

    /// Right-pad a short sheet with incorrect answers.
    pub fn padded(mut self, n_items: usize) -> Self {
        if self.responses.len() < n_items {
            self.responses.resize(n_items, false);
        }
        self
    }
}

/// Which edge of the scale a raw score sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extreme {
    /// Nothing correct (row) or nobody correct (column).
    Zero,
    /// Everything correct (row) or everybody correct (column).
    Full,
}

impl Extreme {
    fn classify(score: usize, max: usize) -> Option<Self> {
        if score == 0 {
            Some(Extreme::Zero)
        } else if score == max {
            Some(Extreme::Full)
        } else {
            None
        }
    }
}

/// Validated `n_students x n_items` grid of 0/1 responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMatrix {
    data: Array2<u8>,
}

impl ResponseMatrix {
    /// Build from boolean rows. All rows must have the same length and the
    /// grid must have at least one student and one item.
    pub fn from_rows<R: AsRef<[bool]>>(rows: &[R]) -> Result<Self, MatrixError> {
        let n_items = check_shape(rows.iter().map(|r| r.as_ref().len()))?;
        let mut data = Array2::<u8>::zeros((rows.len(), n_items));
        for (i, row) in rows.iter().enumerate() {
            for (j, &correct) in row.as_ref().iter().enumerate() {
                data[[i, j]] = u8::from(correct);
            }
        }
        Ok(Self { data })
    }

    /// Build from 0/1 integer rows; any other value is rejected.
    pub fn from_binary_rows<R: AsRef<[i32]>>(rows: &[R]) -> Result<Self, MatrixError> {
        let n_items = check_shape(rows.iter().map(|r| r.as_ref().len()))?;
        let mut data = Array2::<u8>::zeros((rows.len(), n_items));
        for (i, row) in rows.iter().enumerate() {
            for (j, &value) in row.as_ref().iter().enumerate() {
                data[[i, j]] = binary_cell(i, j, value)?;
            }
        }
        Ok(Self { data })
    }

    /// Build from a dense integer array of 0/1 values.
    pub fn from_array(responses: ArrayView2<i32>) -> Result<Self, MatrixError> {
        let (n_students, n_items) = responses.dim();
        if n_students == 0 || n_items == 0 {
            return Err(MatrixError::EmptyInput {
                n_students,
                n_items,
            });
        }
        let mut data = Array2::<u8>::zeros((n_students, n_items));
        for ((i, j), &value) in responses.indexed_iter() {
            data[[i, j]] = binary_cell(i, j, value)?;
        }
        Ok(Self { data })
    }

    /// Build from student records, returning the ids in row order.
    pub fn from_records(records: &[StudentRecord]) -> Result<(Vec<String>, Self), MatrixError> {
        let rows: Vec<&[bool]> = records.iter().map(|r| r.responses.as_slice()).collect();
        let matrix = Self::from_rows(&rows)?;
        let ids = records.iter().map(|r| r.id.clone()).collect();
        Ok((ids, matrix))
    }

    pub fn n_students(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_items(&self) -> usize {
        self.data.ncols()
    }

    #[inline]
    pub fn get(&self, student: usize, item: usize) -> u8 {
        self.data[[student, item]]
    }

    pub fn view(&self) -> ArrayView2<'_, u8> {
        self.data.view()
    }

    pub fn row(&self, student: usize) -> ArrayView1<'_, u8> {
        self.data.row(student)
    }

    pub fn column(&self, item: usize) -> ArrayView1<'_, u8> {
        self.data.column(item)
    }

    /// Number correct per student.
    pub fn row_scores(&self) -> Vec<usize> {
        self.data
            .map_axis(Axis(1), |row| row.iter().map(|&x| x as usize).sum())
            .to_vec()
    }

    /// Number of students answering each item correctly.
    pub fn item_scores(&self) -> Vec<usize> {
        self.data
            .map_axis(Axis(0), |col| col.iter().map(|&x| x as usize).sum())
            .to_vec()
    }

    /// Zero or perfect raw score per student.
    pub fn extreme_students(&self) -> Vec<Option<Extreme>> {
        let n_items = self.n_items();
        self.row_scores()
            .into_iter()
            .map(|s| Extreme::classify(s, n_items))
            .collect()
    }

    /// Items nobody or everybody answered correctly.
    pub fn extreme_items(&self) -> Vec<Option<Extreme>> {
        let n_students = self.n_students();
        self.item_scores()
            .into_iter()
            .map(|s| Extreme::classify(s, n_students))
            .collect()
    }

    /// Responses as `f64`, the form the estimators work in.
    pub fn to_f64(&self) -> Array2<f64> {
        self.data.mapv(f64::from)
    }

    pub fn to_i32(&self) -> Array2<i32> {
        self.data.mapv(i32::from)
    }
}

fn check_shape(lengths: impl Iterator<Item = usize>) -> Result<usize, MatrixError> {
    let mut n_students = 0;
    let mut expected = None;
    for (row, found) in lengths.enumerate() {
        n_students += 1;
        match expected {
            None => expected = Some(found),
            Some(expected) if expected != found => {
                return Err(MatrixError::RaggedMatrix {
                    row,
                    expected,
                    found,
                });
            }
            Some(_) => {}
        }
    }
    let n_items = expected.unwrap_or(0);
    if n_students == 0 || n_items == 0 {
        return Err(MatrixError::EmptyInput {
            n_students,
            n_items,
        });
    }
    Ok(n_items)
}

#[inline]
fn binary_cell(row: usize, col: usize, value: i32) -> Result<u8, MatrixError> {
    match value {
        0 => Ok(0),
        1 => Ok(1),
        other => Err(MatrixError::InvalidValue {
            row,
            col,
            value: other as i64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn scenario() -> ResponseMatrix {
        ResponseMatrix::from_binary_rows(&[
            vec![1, 1, 1, 1],
            vec![1, 0, 1, 0],
            vec![0, 0, 0, 0],
        ])
        .unwrap()
    }

    #[test]
    fn builds_from_bool_rows() {
        let m = ResponseMatrix::from_rows(&[vec![true, false], vec![false, false]]).unwrap();
        assert_eq!(m.n_students(), 2);
        assert_eq!(m.n_items(), 2);
        assert_eq!(m.get(0, 0), 1);
        assert_eq!(m.get(1, 1), 0);
    }

    #[test]
    fn rejects_empty_input() {
        let no_students: Vec<Vec<bool>> = Vec::new();
        assert_eq!(
            ResponseMatrix::from_rows(&no_students),
            Err(MatrixError::EmptyInput {
                n_students: 0,
                n_items: 0
            })
        );
        let no_items = vec![Vec::<bool>::new(), Vec::new()];
        assert_eq!(
            ResponseMatrix::from_rows(&no_items),
            Err(MatrixError::EmptyInput {
                n_students: 2,
                n_items: 0
            })
        );
    }

    #[test]
    fn rejects_ragged_rows() {
        let err = ResponseMatrix::from_binary_rows(&[vec![1, 0, 1], vec![1, 0]]).unwrap_err();
        assert_eq!(
            err,
            MatrixError::RaggedMatrix {
                row: 1,
                expected: 3,
                found: 2
            }
        );
    }

    #[test]
    fn rejects_non_binary_values() {
        let err = ResponseMatrix::from_binary_rows(&[vec![1, 0], vec![2, 0]]).unwrap_err();
        assert_eq!(
            err,
            MatrixError::InvalidValue {
                row: 1,
                col: 0,
                value: 2
            }
        );
        let arr = array![[0, -1]];
        assert!(ResponseMatrix::from_array(arr.view()).is_err());
    }

    #[test]
    fn raw_scores() {
        let m = scenario();
        assert_eq!(m.row_scores(), vec![4, 2, 0]);
        assert_eq!(m.item_scores(), vec![2, 1, 2, 1]);
    }

    #[test]
    fn detects_extremes() {
        let m = scenario();
        assert_eq!(
            m.extreme_students(),
            vec![Some(Extreme::Full), None, Some(Extreme::Zero)]
        );
        assert!(m.extreme_items().iter().all(Option::is_none));

        let m = ResponseMatrix::from_binary_rows(&[vec![1, 0, 1], vec![1, 0, 0]]).unwrap();
        assert_eq!(
            m.extreme_items(),
            vec![Some(Extreme::Full), Some(Extreme::Zero), None]
        );
    }

    #[test]
    fn records_keep_ids_in_row_order() {
        let records = vec![
            StudentRecord::new("a", vec![true, false]),
            StudentRecord::new("b", vec![false, true]),
        ];
        let (ids, m) = ResponseMatrix::from_records(&records).unwrap();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(m.get(1, 1), 1);
    }

    #[test]
    fn short_records_must_be_padded_explicitly() {
        let records = vec![
            StudentRecord::new("a", vec![true, false, true]),
            StudentRecord::new("b", vec![true]),
        ];
        assert!(matches!(
            ResponseMatrix::from_records(&records),
            Err(MatrixError::RaggedMatrix { row: 1, .. })
        ));

        let padded: Vec<_> = records.into_iter().map(|r| r.padded(3)).collect();
        let (_, m) = ResponseMatrix::from_records(&padded).unwrap();
        assert_eq!(m.row_scores(), vec![2, 1]);
    }

    #[test]
    fn record_from_binary() {
        let r = StudentRecord::from_binary("x", &[1, 0, 1]).unwrap();
        assert_eq!(r.responses, vec![true, false, true]);
        assert!(StudentRecord::from_binary("x", &[1, 3]).is_err());
    }
}
