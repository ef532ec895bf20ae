mod common;

use common::{collect_rows, uint_rows, TestTable};
use wormtable::{Config, ElementType, Error, Index, Mode, NumElements, Table, Value};

const UINT4: (&str, ElementType, usize, NumElements) = ("n", ElementType::Uint, 4, NumElements::Fixed(1));

#[test]
fn test_row_ids_follow_commit_order() {
    let t = TestTable::new(&[UINT4], &uint_rows(&[10, 20, 30]));
    let table = t.open();

    assert_eq!(table.num_rows().unwrap(), 3);
    assert_eq!(table.get_row(2).unwrap(), vec![Value::Uint(2), Value::Uint(30)]);
    for id in 0..3 {
        assert_eq!(table.get_row(id).unwrap()[0], Value::Uint(id));
    }
}

#[test]
fn test_variable_char_round_trip() {
    let rows = vec![
        vec![Value::Char(b"hello".to_vec())],
        vec![Value::Char(Vec::new())],
        vec![Value::Char(vec![0, 0])],
    ];
    let t = TestTable::new(&[("s", ElementType::Char, 1, NumElements::Var)], &rows);
    let table = t.open();

    assert_eq!(table.get_row(0).unwrap(), vec![Value::Uint(0), Value::Char(b"hello".to_vec())]);
    assert_eq!(table.get_row(1).unwrap(), vec![Value::Uint(1), Value::Char(Vec::new())]);
    assert_eq!(table.get_row(2).unwrap(), vec![Value::Uint(2), Value::Char(vec![0, 0])]);
}

#[test]
fn test_missing_values_read_back_missing() {
    let columns = [
        ("u", ElementType::Uint, 2, NumElements::Fixed(1)),
        ("i", ElementType::Int, 4, NumElements::Fixed(3)),
        ("f", ElementType::Float, 8, NumElements::Var),
        ("c", ElementType::Char, 1, NumElements::Fixed(6)),
    ];
    let rows = vec![
        vec![Value::Missing, Value::Missing, Value::Missing, Value::Missing],
        vec![
            Value::Uint(7),
            Value::Array(vec![Value::Int(-1), Value::Missing, Value::Int(5)]),
            Value::Array(vec![Value::Float(0.5), Value::Float(-2.25)]),
            Value::Char(b"abc".to_vec()),
        ],
    ];
    let t = TestTable::new(&columns, &rows);
    let table = t.open();

    assert_eq!(
        table.get_row(0).unwrap(),
        vec![Value::Uint(0), Value::Missing, Value::Missing, Value::Missing, Value::Missing]
    );
    assert_eq!(
        table.get_row(1).unwrap(),
        vec![
            Value::Uint(1),
            Value::Uint(7),
            Value::Array(vec![Value::Int(-1), Value::Missing, Value::Int(5)]),
            Value::Array(vec![Value::Float(0.5), Value::Float(-2.25)]),
            Value::Char(b"abc".to_vec()),
        ]
    );
}

#[test]
fn test_insert_encoded_text() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t");
    let mut table = Table::new(&path);
    table.add_id_column(2).unwrap();
    table.add_int_column("pos", "", 4, NumElements::Fixed(2)).unwrap();
    table.add_float_column("q", "", 4, NumElements::Fixed(1)).unwrap();
    table.open(Mode::Write).unwrap();
    table.insert_encoded(1, b"-12;40").unwrap();
    table.insert_encoded(2, b" 2.5 ").unwrap();
    table.commit_row().unwrap();
    assert!(matches!(table.insert_encoded(2, b"abc"), Err(Error::Parse(_))));
    table.close().unwrap();

    let mut table = Table::new(&path);
    table.open(Mode::Read).unwrap();
    assert_eq!(
        table.get_row(0).unwrap(),
        vec![Value::Uint(0), Value::Array(vec![Value::Int(-12), Value::Int(40)]), Value::Float(2.5)]
    );
}

#[test]
fn test_stats_persist_across_reopen() {
    let rows = vec![
        vec![Value::Char(b"a".to_vec())],
        vec![Value::Char(b"abcd".to_vec())],
    ];
    let t = TestTable::new(&[("s", ElementType::Char, 1, NumElements::Var)], &rows);
    let table = t.open();
    let stats = table.stats();

    // 4 byte row id + 3 byte slot, then the variable bytes
    assert_eq!(stats.num_rows, 2);
    assert_eq!(stats.min_row_size, 8);
    assert_eq!(stats.max_row_size, 11);
    assert_eq!(stats.total_row_size, 19);
}

#[test]
fn test_table_rows_range() {
    let values: Vec<u64> = (0..50).map(|v| v * 3).collect();
    let t = TestTable::new(&[UINT4], &uint_rows(&values));
    let table = t.open();

    let all = collect_rows(table.rows(&[1]).unwrap());
    assert_eq!(all.len(), 50);
    assert_eq!(all[49], vec![Value::Uint(147)]);

    let mut rows = table.rows(&[0, 1]).unwrap();
    rows.set_min(10).unwrap();
    rows.set_max(13).unwrap();
    assert_eq!(
        collect_rows(rows),
        vec![
            vec![Value::Uint(10), Value::Uint(30)],
            vec![Value::Uint(11), Value::Uint(33)],
            vec![Value::Uint(12), Value::Uint(36)],
        ]
    );

    let mut rows = table.rows(&[0]).unwrap();
    rows.set_min(48).unwrap();
    assert_eq!(collect_rows(rows), vec![vec![Value::Uint(48)], vec![Value::Uint(49)]]);

    let mut rows = table.rows(&[0]).unwrap();
    rows.set_min(20).unwrap();
    rows.set_max(20).unwrap();
    assert_eq!(rows.count(), 0);
}

#[test]
fn test_bounds_fixed_once_iteration_starts() {
    let t = TestTable::new(&[UINT4], &uint_rows(&[1, 2, 3]));
    let table = t.open();

    let mut rows = table.rows(&[1]).unwrap();
    assert!(rows.next().is_some());
    assert!(matches!(rows.set_max(2), Err(Error::WrongMode(_))));
}

#[test]
fn test_scan_across_many_pages() {
    let config = Config::default().with_page_size(1024).with_cache_size(4096);
    let values: Vec<u64> = (0..5000).collect();
    let t = TestTable::with_config(config, &[UINT4], &uint_rows(&values));
    let mut table = Table::with_config(t.path(), Config::default().with_cache_size(4096));
    table.open(Mode::Read).unwrap();

    let mut expected = 0;
    for row in table.rows(&[0, 1]).unwrap() {
        let row = row.unwrap();
        assert_eq!(row, vec![Value::Uint(expected), Value::Uint(expected)]);
        expected += 1;
    }
    assert_eq!(expected, 5000);
    assert_eq!(table.get_row(4321).unwrap()[1], Value::Uint(4321));
}

#[test]
fn test_missing_row_is_not_found() {
    let t = TestTable::new(&[UINT4], &uint_rows(&[1]));
    let table = t.open();
    assert!(matches!(table.get_row(5), Err(Error::NotFound(_))));
}

#[test]
fn test_mode_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t");
    let mut table = Table::new(&path);
    table.add_id_column(4).unwrap();
    table.add_uint_column("n", "", 4, NumElements::Fixed(1)).unwrap();

    assert!(matches!(table.commit_row(), Err(Error::Closed(_))));
    assert!(matches!(table.get_row(0), Err(Error::Closed(_))));

    table.open(Mode::Write).unwrap();
    assert!(matches!(table.get_row(0), Err(Error::WrongMode(_))));
    assert!(matches!(table.rows(&[0]), Err(Error::WrongMode(_))));
    assert!(matches!(table.open(Mode::Read), Err(Error::WrongMode(_))));
    table.commit_row().unwrap();
    assert!(matches!(
        table.add_uint_column("late", "", 4, NumElements::Fixed(1)),
        Err(Error::WrongMode(_))
    ));
    table.close().unwrap();
    assert!(matches!(table.close(), Err(Error::Closed(_))));

    let mut table = Table::new(&path);
    table.open(Mode::Read).unwrap();
    assert!(matches!(table.commit_row(), Err(Error::WrongMode(_))));
    assert!(matches!(table.insert_value(1, &Value::Uint(1)), Err(Error::WrongMode(_))));
    assert_eq!(table.get_row(0).unwrap(), vec![Value::Uint(0), Value::Missing]);
}

#[test]
fn test_value_errors_leave_row_usable() {
    let dir = tempfile::tempdir().unwrap();
    let mut table = Table::new(dir.path().join("t"));
    table.add_id_column(4).unwrap();
    table.add_uint_column("u", "", 1, NumElements::Fixed(1)).unwrap();
    table.add_char_column("c", "", NumElements::Fixed(2)).unwrap();
    table.open(Mode::Write).unwrap();

    assert!(matches!(table.insert_value(1, &Value::Uint(254)), Err(Error::Overflow(_))));
    assert!(matches!(table.insert_value(2, &Value::Char(b"abc".to_vec())), Err(Error::OutOfRange(_))));
    assert!(matches!(table.insert_value(0, &Value::Uint(3)), Err(Error::Schema(_))));
    assert!(matches!(table.insert_value(9, &Value::Uint(3)), Err(Error::OutOfRange(_))));
    table.insert_value(1, &Value::Uint(253)).unwrap();
    assert_eq!(table.commit_row().unwrap(), 0);
    table.close().unwrap();
}

#[test]
fn test_index_names_lists_built_indexes() {
    let t = TestTable::new(&[UINT4], &uint_rows(&[3, 1, 2]));
    let table = t.open();
    assert!(table.index_names().unwrap().is_empty());

    common::build_index(&table, "by_n", &["n"], &[]);
    common::build_index(&table, "a_first", &["n"], &[]);
    assert_eq!(table.index_names().unwrap(), vec!["a_first".to_string(), "by_n".to_string()]);
}

#[test]
fn test_one_byte_row_id() {
    let t = TestTable::with_id_size(1, &[UINT4], &uint_rows(&[10, 20, 30]));
    let table = t.open();
    assert_eq!(table.num_rows().unwrap(), 3);
    assert_eq!(table.get_row(2).unwrap(), vec![Value::Uint(2), Value::Uint(30)]);

    let rows = vec![
        vec![Value::Char(b"hello".to_vec())],
        vec![Value::Char(Vec::new())],
        vec![Value::Char(vec![0, 0])],
    ];
    let t = TestTable::with_id_size(1, &[("s", ElementType::Char, 1, NumElements::Var)], &rows);
    let table = t.open();
    assert_eq!(table.get_row(0).unwrap(), vec![Value::Uint(0), Value::Char(b"hello".to_vec())]);
    assert_eq!(table.get_row(1).unwrap(), vec![Value::Uint(1), Value::Char(Vec::new())]);
    assert_eq!(table.get_row(2).unwrap(), vec![Value::Uint(2), Value::Char(vec![0, 0])]);
}

#[test]
fn test_row_ids_exhaust_key_width() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t");
    let mut table = Table::new(&path);
    table.add_id_column(1).unwrap();
    table.add_uint_column("n", "", 2, NumElements::Fixed(1)).unwrap();
    table.open(Mode::Write).unwrap();
    for id in 0..254u64 {
        table.insert_value(1, &Value::Uint(id)).unwrap();
        assert_eq!(table.commit_row().unwrap(), id);
    }
    assert!(matches!(table.commit_row(), Err(Error::Overflow(_))));
    table.close().unwrap();

    let mut table = Table::new(&path);
    table.open(Mode::Read).unwrap();
    assert_eq!(table.num_rows().unwrap(), 254);
    assert_eq!(table.get_row(253).unwrap(), vec![Value::Uint(253), Value::Uint(253)]);
}

#[test]
fn test_fixed_region_bounded_by_max_row_size() {
    let dir = tempfile::tempdir().unwrap();
    let mut table = Table::new(dir.path().join("t"));
    table.add_id_column(4).unwrap();
    // 4 + 32 * 2032 fits, a 33rd column does not
    for i in 0..32 {
        table
            .add_uint_column(&format!("c{}", i), "", 8, NumElements::Fixed(254))
            .unwrap();
    }
    let err = table.add_uint_column("c32", "", 8, NumElements::Fixed(254)).unwrap_err();
    assert!(matches!(err, Error::RowOverflow(ref msg) if msg.contains("c32")));
    assert!(table.columns().iter().all(|c| c.name() != "c32"));

    table.open(Mode::Write).unwrap();
    table.insert_value(1, &Value::Array(vec![Value::Uint(9); 254])).unwrap();
    assert_eq!(table.commit_row().unwrap(), 0);
    table.close().unwrap();
}

#[test]
fn test_variable_region_bounded_by_max_row_size() {
    let dir = tempfile::tempdir().unwrap();
    let mut table = Table::new(dir.path().join("t"));
    table.add_id_column(4).unwrap();
    for i in 0..33 {
        table.add_uint_column(&format!("v{}", i), "", 8, NumElements::Var).unwrap();
    }
    table.open(Mode::Write).unwrap();
    let full = Value::Array(vec![Value::Uint(1); 254]);
    for position in 1..33 {
        table.insert_value(position, &full).unwrap();
    }
    assert!(matches!(table.insert_value(33, &full), Err(Error::RowOverflow(_))));
    assert_eq!(table.commit_row().unwrap(), 0);
    table.close().unwrap();
}

#[test]
fn test_rewrite_removes_stale_indexes() {
    let t = TestTable::new(&[("u", ElementType::Uint, 4, NumElements::Fixed(1))], &uint_rows(&[1, 2, 3]));
    {
        let table = t.open();
        common::build_index(&table, "by_u", &["u"], &[]);
        assert_eq!(table.index_names().unwrap(), vec!["by_u".to_string()]);
    }

    let mut table = Table::new(t.path());
    table.add_id_column(4).unwrap();
    table.add_uint_column("u", "", 4, NumElements::Fixed(1)).unwrap();
    table.open(Mode::Write).unwrap();
    for v in [100, 200, 300] {
        table.insert_value(1, &Value::Uint(v)).unwrap();
        table.commit_row().unwrap();
    }
    table.close().unwrap();

    let table = t.open();
    assert!(table.index_names().unwrap().is_empty());
    assert!(!t.path().join("index_by_u.db").exists());
    let mut index = Index::new(&table, "by_u").unwrap();
    assert!(matches!(index.open(Mode::Read), Err(Error::NotFound(_))));
}
