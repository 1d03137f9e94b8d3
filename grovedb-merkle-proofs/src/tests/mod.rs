mod test_codec;
mod test_properties;
