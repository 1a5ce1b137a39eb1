mod tests_accessors;
mod tests_decode_errors;
mod tests_roundtrip;
