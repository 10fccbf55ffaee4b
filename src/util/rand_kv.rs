use rand::{distr::Alphanumeric, Rng};

pub fn get_test_key(i: usize) -> Vec<u8> {
  format!("snapkv-key-{:09}", i).into_bytes()
}

pub fn get_test_value(i: usize) -> Vec<u8> {
  let suffix: String = rand::rng()
    .sample_iter(&Alphanumeric)
    .take(16)
    .map(char::from)
    .collect();
  format!("snapkv-value-{:09}-{}", i, suffix).into_bytes()
}
